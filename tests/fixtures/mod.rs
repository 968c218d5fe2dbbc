//! Synthetic image payloads for pipeline and proxy tests.
//!
//! Only the magic bytes matter for format sniffing; the rest is padding.

#![allow(dead_code)]

pub const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
pub const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];

/// Marker the fake upstream looks for to reject an upload.
pub const REJECT_MARKER: &[u8] = b"REJECT";

/// Bytes the fake upstream serves as the compressed artifact.
pub const COMPRESSED_ARTIFACT: &[u8] = b"\x89PNG\r\n\x1a\ncompressed";

fn padded(magic: &[u8], len: usize) -> Vec<u8> {
    let mut bytes = magic.to_vec();
    bytes.resize(len.max(magic.len()), 0);
    bytes
}

/// A PNG-looking payload of exactly `len` bytes (at least the magic).
pub fn png_bytes(len: usize) -> Vec<u8> {
    padded(PNG_MAGIC, len)
}

pub fn jpeg_bytes(len: usize) -> Vec<u8> {
    padded(JPEG_MAGIC, len)
}

/// A PNG payload the fake upstream refuses with 415.
pub fn rejected_png() -> Vec<u8> {
    let mut bytes = png_bytes(64);
    bytes.extend_from_slice(REJECT_MARKER);
    bytes
}
