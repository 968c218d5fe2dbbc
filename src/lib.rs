//! Image compression pipeline for the TinyPNG / Tinify API
//!
//! This library provides the client-side pipeline (per-image state machine,
//! concurrent batch orchestration, bounded history, stats) and the companion
//! proxy server that forwards requests to the compression service.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
