//! isofetch core library
//!
//! This library provides the transfer engine behind the `isofetch` CLI: a
//! resumable, multi-connection HTTP/1.1 + HTTP/2 downloader for large binary
//! payloads such as OS images.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Probe, connection pool, chunk fetcher, write coordinator,
//!   progress tracker, resume store and the orchestrating engine
//! - [`filename`] - Destination filename derivation and sanitization

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod filename;
pub(crate) mod user_agent;

#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use download::{
    DEFAULT_MAX_RETRIES, DownloadEngine, DownloadError, DownloadOptions, DownloadSummary,
    EngineError, FailureType, Protocol, RetryDecision, RetryPolicy, Strategy, classify_error,
    download,
};
pub use filename::{file_name_from_url, sanitize_filename};
