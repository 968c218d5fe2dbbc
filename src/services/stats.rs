//! Read-only summaries over the live batch and the history log.

use serde::Serialize;

use crate::models::history::{savings_percent, HistoryEntry};
use crate::models::job::{ImageJob, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    /// Negative when the outputs are larger than the inputs.
    pub saved_bytes: i64,
    pub savings_percent: f64,
}

impl Summary {
    /// Summarize `(original, compressed)` pairs. `None` means no data.
    pub fn from_sizes<I>(sizes: I) -> Option<Self>
    where
        I: IntoIterator<Item = (u64, u64)>,
    {
        let (count, original_bytes, compressed_bytes) = sizes
            .into_iter()
            .fold((0usize, 0u64, 0u64), |(n, orig, comp), (o, c)| {
                (n + 1, orig.saturating_add(o), comp.saturating_add(c))
            });
        if count == 0 {
            return None;
        }
        Some(Self {
            count,
            original_bytes,
            compressed_bytes,
            saved_bytes: original_bytes as i64 - compressed_bytes as i64,
            savings_percent: savings_percent(original_bytes, compressed_bytes),
        })
    }

    /// Successful jobs only.
    pub fn of_jobs(jobs: &[ImageJob]) -> Option<Self> {
        Self::from_sizes(jobs.iter().filter_map(|job| match job.status() {
            JobStatus::Success => job
                .compressed_size()
                .map(|compressed| (job.original_size(), compressed)),
            _ => None,
        }))
    }

    pub fn of_history(entries: &[HistoryEntry]) -> Option<Self> {
        Self::from_sizes(entries.iter().map(|e| (e.original_size, e.compressed_size)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stats {
    pub session: Option<Summary>,
    pub all_time: Option<Summary>,
}

impl Stats {
    pub fn compute(jobs: &[ImageJob], history: &[HistoryEntry]) -> Self {
        Self {
            session: Summary::of_jobs(jobs),
            all_time: Summary::of_history(history),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.session.is_none() && self.all_time.is_none()
    }
}

/// Human-readable byte count: `B`, `KB` or `MB` with one decimal.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    }
}

/// `saved 60.0%` or `grew 20.0%`, depending on the sign.
pub fn format_savings(percent: f64) -> String {
    if percent < 0.0 {
        format!("grew {:.1}%", -percent)
    } else {
        format!("saved {percent:.1}%")
    }
}
