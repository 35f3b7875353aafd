//! Resumable multi-connection HTTP download engine.
//!
//! This module provides everything needed to fetch one large resource over
//! HTTP/1.1 or HTTP/2, split into concurrent byte ranges, with resume support.
//!
//! # Features
//!
//! - Protocol probe with HTTP/2 → HTTP/1.1 fallback and redirect following
//! - Per-origin connection pool shared by probe and chunk requests
//! - Concurrent ranged GETs reassembled with positioned writes
//! - Bounded per-chunk retry with fixed backoff
//! - Resume sidecar (`<name>.crdownload`) beside the temp file (`<name>.tmp`)
//! - Transparent gzip/deflate/br decoding on whole-body requests
//! - Throughput/ETA tracking with throttled rendering and checkpoints
//!
//! # Example
//!
//! ```no_run
//! use isofetch_core::download::{DownloadOptions, download};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let summary = download(
//!     "https://example.com/releases/disk.iso",
//!     "disk.iso",
//!     DownloadOptions::default(),
//! )
//! .await?;
//! println!("Downloaded: {}", summary.path.display());
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod constants;
mod engine;
mod error;
pub mod fetcher;
pub mod pool;
pub mod probe;
pub mod progress;
pub mod resume;
mod retry;
pub mod writer;

pub use chunk::{ByteRange, Chunk, ChunkStatus, ChunkTable, partition};
pub use engine::{
    DownloadEngine, DownloadOptions, DownloadState, DownloadSummary, DownloadTask, EngineError,
    Strategy, download,
};
pub use error::DownloadError;
pub use fetcher::{ByteSink, FetchRange, FetchRequest, fetch};
pub use pool::{ConnectionPool, PoolConfig, Protocol, Session};
pub use probe::{Capabilities, ProbeResult, probe};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use resume::{ResumeRecord, ResumeState, ResumeStore};
pub use retry::{
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF, FailureType, RetryDecision, RetryPolicy,
    classify_error,
};
pub use writer::{WriteCoordinator, WriteHandle};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
