//! Download orchestrator.
//!
//! [`DownloadEngine::download`] drives one transfer through
//! `Init → Probing → {SingleStream | ParallelChunks} → Finalizing → Done`,
//! with `Failed` reachable from every non-terminal state.
//!
//! # Overview
//!
//! - **Init**: create the output directory and validate any resume sidecar.
//! - **Probing**: skipped when a valid sidecar already names the total length.
//! - **Strategy**: parallel chunks when the server declares byte ranges and the
//!   resource is at least one chunk long, otherwise a single stream.
//! - **Finalizing**: size check, SHA-256 digest (compared when one is expected),
//!   atomic rename, sidecar removal.
//!
//! A failed or cancelled transfer leaves the temp file truncated to its
//! contiguous committed prefix plus a matching sidecar, so the next invocation
//! resumes instead of restarting.
//!
//! # Example
//!
//! ```no_run
//! use isofetch_core::download::{DownloadEngine, DownloadOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = DownloadEngine::new(DownloadOptions::default())?
//!     .with_output_dir("./isos");
//! let summary = engine
//!     .download("https://example.com/releases/disk.iso", "disk.iso")
//!     .await?;
//! println!("{} bytes at {:.0} B/s", summary.size, summary.avg_speed_bytes_per_sec);
//! engine.pool().shutdown();
//! # Ok(())
//! # }
//! ```

mod finalize;
mod parallel;
mod persistence;
mod single;
mod task;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use task::{DownloadState, DownloadTask, Strategy};

use self::persistence::Checkpointer;
use super::constants::{
    DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_CONNECTIONS, DEFAULT_OUTPUT_DIR, MAX_CONNECTIONS,
    MIN_CHUNK_SIZE_BYTES, MIN_CONNECTIONS, PROBE_TIMEOUT, STALL_TIMEOUT,
};
use super::pool::{ConnectionPool, PoolConfig, Protocol, Session};
use super::probe::{Capabilities, probe};
use super::progress::ProgressTracker;
use super::resume::{ResumeState, ResumeStore};
use super::retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF, RetryPolicy};
use super::writer::{WriteCoordinator, WriteHandle};
use super::DownloadError;
use crate::filename::sanitize_filename;

/// Error type for engine construction.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid connection count provided.
    #[error(
        "invalid connections value {value}: must be between {MIN_CONNECTIONS} and {MAX_CONNECTIONS}"
    )]
    InvalidConnections {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Chunk size below the minimum.
    #[error("invalid chunk size {value}: must be at least {MIN_CHUNK_SIZE_BYTES} bytes")]
    InvalidChunkSize {
        /// The invalid value that was provided.
        value: u64,
    },
}

/// Tunables for a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Maximum concurrent chunk fetches (1-64).
    pub connections: usize,
    /// Resources shorter than this are fetched as a single stream.
    pub chunk_size_bytes: u64,
    /// Try HTTP/2 first for `https` URLs.
    pub use_http2: bool,
    /// Accept gzip/deflate/br on non-ranged requests.
    pub use_compression: bool,
    /// Retries per chunk after the first attempt.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_backoff: Duration,
    /// Timeout for the metadata probe.
    pub probe_timeout: Duration,
    /// Abort a fetch that makes no progress for this long.
    pub stall_timeout: Duration,
    /// Lowercase hex SHA-256 the finished file must match.
    pub expected_sha256: Option<String>,
    /// Draw a progress bar on stderr.
    pub show_progress: bool,
    /// Force data to stable storage at each checkpoint.
    pub sync_on_checkpoint: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            connections: DEFAULT_CONNECTIONS,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            use_http2: true,
            use_compression: true,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            probe_timeout: PROBE_TIMEOUT,
            stall_timeout: STALL_TIMEOUT,
            expected_sha256: None,
            show_progress: true,
            sync_on_checkpoint: false,
        }
    }
}

impl DownloadOptions {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for an out-of-range connection count or chunk size.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(MIN_CONNECTIONS..=MAX_CONNECTIONS).contains(&self.connections) {
            return Err(EngineError::InvalidConnections {
                value: self.connections,
            });
        }
        if self.chunk_size_bytes < MIN_CHUNK_SIZE_BYTES {
            return Err(EngineError::InvalidChunkSize {
                value: self.chunk_size_bytes,
            });
        }
        Ok(())
    }

    /// Retry policy built from `max_retries` and `retry_backoff`.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_backoff)
    }
}

/// Result of a completed download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSummary {
    /// Destination file name.
    pub filename: String,
    /// Destination path.
    pub path: PathBuf,
    /// Final size in bytes.
    pub size: u64,
    /// Bytes transferred in this session divided by wall time.
    pub avg_speed_bytes_per_sec: f64,
    /// Wall time of this invocation.
    pub duration: Duration,
    /// Transport used for transfer requests.
    pub protocol: Protocol,
    /// Transfer strategy; `None` when a resumed file was already complete.
    pub strategy: Option<Strategy>,
    /// Offset this session started from.
    pub resumed_from: u64,
    /// Lowercase hex SHA-256 of the finished file.
    pub sha256: String,
    /// True when `sha256` was checked against an expected digest.
    pub sha256_verified: bool,
}

/// Shared state handed to the strategy runners.
#[derive(Debug)]
struct TransferContext {
    pool: Arc<ConnectionPool>,
    url: Url,
    protocol: Protocol,
    total_bytes: Option<u64>,
    writes: WriteHandle,
    progress: ProgressTracker,
    checkpoints: Checkpointer,
    cancel: CancellationToken,
    policy: RetryPolicy,
    stall_timeout: Duration,
    connections: usize,
}

impl TransferContext {
    fn session(&self) -> Result<Session, DownloadError> {
        self.pool.acquire(&self.url, self.protocol)
    }

    /// Drops a broken HTTP/2 session and routes the authority to HTTP/1.1.
    ///
    /// Later `session()` calls for this URL return the HTTP/1.1 group, so
    /// the retry of the failed request already goes out over HTTP/1.1.
    fn note_failure(&self, session: &Session, error: &DownloadError) {
        if session.protocol() == Protocol::Http2 && error.is_transport_failure() {
            warn!(error = %error, "HTTP/2 connection failed; downgrading to HTTP/1.1");
            session.mark_closed();
            self.pool.downgrade(&self.url);
        }
    }
}

/// Sleeps `delay` unless `cancel` fires first.
async fn backoff(cancel: &CancellationToken, delay: Duration) -> Result<(), DownloadError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DownloadError::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Resumable multi-connection downloader.
#[derive(Debug)]
pub struct DownloadEngine {
    pool: Arc<ConnectionPool>,
    options: DownloadOptions,
    output_dir: PathBuf,
    cancel: CancellationToken,
}

impl DownloadEngine {
    /// Creates an engine with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if `options` fail validation.
    #[instrument(level = "debug", skip(options))]
    pub fn new(options: DownloadOptions) -> Result<Self, EngineError> {
        options.validate()?;
        debug!(
            connections = options.connections,
            chunk_size = options.chunk_size_bytes,
            http2 = options.use_http2,
            compression = options.use_compression,
            max_retries = options.max_retries,
            "creating download engine"
        );
        let pool = Arc::new(ConnectionPool::new(PoolConfig {
            use_compression: options.use_compression,
            ..PoolConfig::default()
        }));
        Ok(Self {
            pool,
            options,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            cancel: CancellationToken::new(),
        })
    }

    /// Shares an existing connection pool.
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<ConnectionPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the directory downloads are written to.
    #[must_use]
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    /// Uses `cancel` as the interruption signal.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The engine's connection pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// The engine's options.
    #[must_use]
    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// A handle that interrupts transfers when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Downloads `url` into `<output_dir>/<file_name>`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Cancelled`] on interruption and the failing
    /// stage's error otherwise. Partial data and the sidecar are kept.
    #[instrument(skip(self), fields(output_dir = %self.output_dir.display()))]
    pub async fn download(&self, url: &str, file_name: &str) -> Result<DownloadSummary, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::invalid_url(url));
        }
        let file_name = sanitize_filename(file_name);
        let mut task = DownloadTask::new(
            parsed,
            self.output_dir.join(&file_name),
            self.options.connections,
        );

        match self.run(&mut task, file_name).await {
            Ok(summary) => {
                task.transition(DownloadState::Done);
                info!(
                    path = %summary.path.display(),
                    size = summary.size,
                    duration_ms = summary.duration.as_millis(),
                    "download complete"
                );
                Ok(summary)
            }
            Err(error) => {
                task.transition(DownloadState::Failed);
                if error.is_cancelled() {
                    info!("download interrupted; partial data kept for resume");
                } else {
                    warn!(error = %error, "download failed");
                }
                Err(error)
            }
        }
    }

    async fn run(&self, task: &mut DownloadTask, file_name: String) -> Result<DownloadSummary, DownloadError> {
        let started = Instant::now();

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| DownloadError::write_failure(&self.output_dir, e))?;
        let store = ResumeStore::for_destination(&task.destination);
        let (resume_offset, recorded_total) = match store.inspect(task.source_url.as_str()).await {
            ResumeState::Resume(record) => (record.downloaded_bytes, Some(record.total_bytes)),
            ResumeState::Fresh => (0, None),
        };
        if self.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        task.transition(DownloadState::Probing);
        self.resolve_capabilities(task, recorded_total).await?;

        let total = task.total_bytes;
        if let Some(total) = total
            && resume_offset > 0
            && resume_offset >= total
        {
            info!(total, "partial file already complete");
            task.transition(DownloadState::Finalizing);
            let verified = finalize::finalize(task, &store, self.options.expected_sha256.as_deref()).await?;
            return Ok(self.summary(task, file_name, verified, None, resume_offset, started));
        }

        let mut strategy = task.choose_strategy(self.options.chunk_size_bytes);
        info!(
            strategy = %strategy,
            capabilities = ?task.capabilities,
            total = ?total,
            resume_offset,
            "starting transfer"
        );

        let coordinator = WriteCoordinator::open(store.temp_path(), resume_offset == 0).await?;
        let ctx = Arc::new(TransferContext {
            pool: Arc::clone(&self.pool),
            url: task.url.clone(),
            protocol: task.capabilities.protocol(),
            total_bytes: total,
            writes: coordinator.handle(),
            progress: ProgressTracker::new(total, resume_offset, self.options.show_progress),
            checkpoints: Checkpointer::new(
                store.clone(),
                task.source_url.to_string(),
                total,
                self.options.sync_on_checkpoint,
            ),
            cancel: self.cancel.clone(),
            policy: self.options.retry_policy(),
            stall_timeout: self.options.stall_timeout,
            connections: task.connections,
        });
        ctx.checkpoints.save(&ctx.writes, resume_offset).await;

        let outcome = match strategy {
            Strategy::ParallelChunks => {
                task.transition(DownloadState::ParallelChunks);
                match parallel::run(&ctx, resume_offset).await {
                    Err(error) if matches!(error.root(), DownloadError::RangeIgnored { .. }) => {
                        warn!(error = %error, "server ignored Range; restarting as a single stream");
                        strategy = Strategy::SingleStream;
                        task.transition(DownloadState::SingleStream);
                        task.capabilities = Capabilities::NoRanges(task.capabilities.protocol());
                        restart_from_zero(&ctx).await?;
                        single::run(&ctx, 0, false).await
                    }
                    other => other,
                }
            }
            Strategy::SingleStream => {
                task.transition(DownloadState::SingleStream);
                single::run(&ctx, resume_offset, task.capabilities.accepts_ranges()).await
            }
        };

        ctx.progress.finish();
        if let Ok(received) = &outcome {
            debug!(received, "transfer finished");
            ctx.checkpoints.save(&ctx.writes, ctx.progress.downloaded()).await;
        }
        let closed = coordinator.close().await;
        if let Err(error) = outcome {
            if let Err(close_error) = closed {
                warn!(error = %close_error, "failed to close temp file");
            }
            return Err(error);
        }
        closed?;

        task.transition(DownloadState::Finalizing);
        let verified = finalize::finalize(task, &store, self.options.expected_sha256.as_deref()).await?;
        Ok(self.summary(task, file_name, verified, Some(strategy), resume_offset, started))
    }

    /// Fills in protocol, length and range support from a sidecar or a probe.
    async fn resolve_capabilities(
        &self,
        task: &mut DownloadTask,
        recorded_total: Option<u64>,
    ) -> Result<(), DownloadError> {
        let url = task.source_url.clone();

        if let Some(total) = recorded_total {
            let protocol = if self.options.use_http2
                && url.scheme() == "https"
                && !self.pool.is_downgraded(&url)
            {
                Protocol::Http2
            } else {
                Protocol::Http1
            };
            debug!(total, %protocol, "skipping probe; length known from resume record");
            task.apply_probe(Capabilities::new(protocol, true), Some(total), url);
            return Ok(());
        }

        match probe(&self.pool, &url, self.options.use_http2, self.options.probe_timeout).await {
            Ok(result) => {
                task.apply_probe(result.capabilities, result.total_bytes, result.final_url);
                Ok(())
            }
            Err(error @ (DownloadError::TooManyRedirects { .. } | DownloadError::Cancelled)) => {
                Err(error)
            }
            Err(error) => {
                warn!(error = %error, "probe failed; falling back to single stream of unknown length");
                task.apply_probe(Capabilities::NoRanges(Protocol::Http1), None, url);
                Ok(())
            }
        }
    }

    fn summary(
        &self,
        task: &DownloadTask,
        filename: String,
        verified: finalize::FinalizedFile,
        strategy: Option<Strategy>,
        resumed_from: u64,
        started: Instant,
    ) -> DownloadSummary {
        let duration = started.elapsed();
        let seconds = duration.as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let avg_speed_bytes_per_sec = if seconds > 0.0 {
            verified.size.saturating_sub(resumed_from) as f64 / seconds
        } else {
            0.0
        };
        DownloadSummary {
            filename,
            path: task.destination.clone(),
            size: verified.size,
            avg_speed_bytes_per_sec,
            duration,
            protocol: self.pool_protocol(task),
            strategy,
            resumed_from,
            sha256: verified.sha256,
            sha256_verified: verified.sha256_verified,
        }
    }

    fn pool_protocol(&self, task: &DownloadTask) -> Protocol {
        match task.capabilities.protocol() {
            Protocol::Http2 if self.pool.is_downgraded(&task.url) => Protocol::Http1,
            protocol => protocol,
        }
    }
}

/// Discards everything written so far.
async fn restart_from_zero(ctx: &TransferContext) -> Result<(), DownloadError> {
    ctx.writes.truncate(0).await?;
    ctx.progress.reset(0);
    Ok(())
}

/// Downloads `url` into `downloads/<file_name>` with a one-off engine.
///
/// # Errors
///
/// Returns [`DownloadError::InvalidOptions`] when `options` fail validation,
/// otherwise as [`DownloadEngine::download`].
pub async fn download(
    url: &str,
    file_name: &str,
    options: DownloadOptions,
) -> Result<DownloadSummary, DownloadError> {
    let engine =
        DownloadEngine::new(options).map_err(|source| DownloadError::InvalidOptions { source })?;
    let result = engine.download(url, file_name).await;
    engine.pool().shutdown();
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::test_support::http1_only::Http1OnlyServer;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Transfer context that starts on HTTP/2, as a resumed https download does.
    async fn http2_context(
        server: &Http1OnlyServer,
        dir: &Path,
        total: u64,
        connections: usize,
    ) -> (Arc<TransferContext>, WriteCoordinator, ResumeStore) {
        let store = ResumeStore::for_destination(&dir.join("disk.iso"));
        let coordinator = WriteCoordinator::open(store.temp_path(), true).await.unwrap();
        let url = server.url("/disk.iso");
        let ctx = Arc::new(TransferContext {
            pool: Arc::new(ConnectionPool::default()),
            url: url.clone(),
            protocol: Protocol::Http2,
            total_bytes: Some(total),
            writes: coordinator.handle(),
            progress: ProgressTracker::new(Some(total), 0, false),
            checkpoints: Checkpointer::new(store.clone(), url.to_string(), Some(total), false),
            cancel: CancellationToken::new(),
            policy: RetryPolicy::new(2, Duration::from_millis(10)),
            stall_timeout: Duration::from_secs(5),
            connections,
        });
        (ctx, coordinator, store)
    }

    #[test]
    fn test_options_default_values() {
        let options = DownloadOptions::default();
        assert_eq!(options.connections, 8);
        assert_eq!(options.chunk_size_bytes, 1_048_576);
        assert!(options.use_http2);
        assert!(options.use_compression);
        assert_eq!(options.retry_policy().max_attempts(), 4);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_reject_connections_out_of_range() {
        for value in [0, 65] {
            let options = DownloadOptions {
                connections: value,
                ..DownloadOptions::default()
            };
            assert!(matches!(
                options.validate(),
                Err(EngineError::InvalidConnections { value: v }) if v == value
            ));
        }
    }

    #[test]
    fn test_options_reject_tiny_chunk_size() {
        let options = DownloadOptions {
            chunk_size_bytes: 1024,
            ..DownloadOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(EngineError::InvalidChunkSize { value: 1024 })
        ));
    }

    #[test]
    fn test_engine_error_display() {
        let msg = EngineError::InvalidConnections { value: 0 }.to_string();
        assert!(msg.contains("invalid connections"));
        assert!(msg.contains("64"));
    }

    #[test]
    fn test_engine_builder() {
        let cancel = CancellationToken::new();
        let pool = Arc::new(ConnectionPool::default());
        let engine = DownloadEngine::new(DownloadOptions::default())
            .unwrap()
            .with_output_dir("/tmp/isos")
            .with_pool(Arc::clone(&pool))
            .with_cancellation(cancel.clone());
        assert!(Arc::ptr_eq(engine.pool(), &pool));
        cancel.cancel();
        assert!(engine.cancellation_token().is_cancelled());
        assert_eq!(engine.options().connections, 8);
    }

    #[tokio::test]
    async fn test_single_stream_falls_back_to_http1_when_origin_rejects_http2() {
        let body = patterned(200_000);
        let Some(server) = Http1OnlyServer::start(body.clone()).await else {
            return;
        };
        let dir = tempfile::TempDir::new().unwrap();
        let (ctx, coordinator, store) =
            http2_context(&server, dir.path(), body.len() as u64, 1).await;

        let received = single::run(&ctx, 0, true).await.unwrap();
        coordinator.close().await.unwrap();

        assert_eq!(received, body.len() as u64);
        assert!(ctx.pool.is_downgraded(&ctx.url));
        assert!(server.h2_rejected() >= 1);
        assert_eq!(server.gets(), 1);
        assert_eq!(tokio::fs::read(store.temp_path()).await.unwrap(), body);
    }

    #[tokio::test]
    async fn test_parallel_chunks_fall_back_to_http1_when_origin_rejects_http2() {
        let body = patterned(400_000);
        let Some(server) = Http1OnlyServer::start(body.clone()).await else {
            return;
        };
        let dir = tempfile::TempDir::new().unwrap();
        let (ctx, coordinator, store) =
            http2_context(&server, dir.path(), body.len() as u64, 4).await;

        let fetched = parallel::run(&ctx, 0).await.unwrap();
        coordinator.close().await.unwrap();

        assert_eq!(fetched, body.len() as u64);
        assert!(ctx.pool.is_downgraded(&ctx.url));
        assert_eq!(
            ctx.pool.acquire(&ctx.url, Protocol::Http2).unwrap().protocol(),
            Protocol::Http1
        );
        assert_eq!(server.gets(), 4);
        assert_eq!(tokio::fs::read(store.temp_path()).await.unwrap(), body);
    }

    #[tokio::test]
    async fn test_download_rejects_invalid_url() {
        let engine = DownloadEngine::new(DownloadOptions::default()).unwrap();
        for url in ["not a url", "ftp://example.com/disk.iso"] {
            let error = engine.download(url, "disk.iso").await.unwrap_err();
            assert!(matches!(error, DownloadError::InvalidUrl { .. }), "{url}");
        }
    }

    #[tokio::test]
    async fn test_download_fn_rejects_invalid_options() {
        let options = DownloadOptions {
            connections: 0,
            ..DownloadOptions::default()
        };
        let error = download("https://example.com/disk.iso", "disk.iso", options)
            .await
            .unwrap_err();
        assert!(matches!(error, DownloadError::InvalidOptions { .. }));
    }

    #[tokio::test]
    async fn test_download_cancelled_before_start() {
        let dir = tempfile::TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = DownloadEngine::new(DownloadOptions::default())
            .unwrap()
            .with_output_dir(dir.path())
            .with_cancellation(cancel);
        let error = engine
            .download("http://127.0.0.1:9/disk.iso", "disk.iso")
            .await
            .unwrap_err();
        assert!(error.is_cancelled());
    }
}
