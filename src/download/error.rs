//! Error types for the download module.
//!
//! This module defines structured errors for every stage of a transfer
//! (probe, chunk fetch, disk write, finalize), carrying enough context to
//! diagnose a failure and resume it later.

use std::path::PathBuf;

use thiserror::Error;

use super::EngineError;

/// Errors that can occur while downloading a resource.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The provided URL is malformed or uses an unsupported scheme.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Capability probe failed (network error, timeout or non-2xx on HEAD).
    #[error("probe failed for {url}: {reason}")]
    ProbeFailed {
        /// The probed URL.
        url: String,
        /// Human-readable cause.
        reason: String,
    },

    /// Redirect chain exceeded the hop limit.
    #[error("too many redirects fetching {url}")]
    TooManyRedirects {
        /// The URL that started the redirect chain.
        url: String,
    },

    /// Server answered a GET with a status other than 200/206.
    #[error("unsupported HTTP status {status} fetching {url}")]
    UnsupportedStatus {
        /// The requested URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// No forward progress within the stall timeout.
    #[error("timeout fetching {url}: no progress within the stall window")]
    ChunkTimeout {
        /// The URL that stalled.
        url: String,
    },

    /// Network-level error (DNS resolution, connection refused, reset, TLS).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Compressed payload could not be decoded.
    #[error("failed to decode response body from {url}: {source}")]
    DecodeFailure {
        /// The URL being fetched.
        url: String,
        /// The underlying decoder error.
        #[source]
        source: reqwest::Error,
    },

    /// Disk write, flush, truncate or rename failed.
    #[error("write failure on {path}: {source}")]
    WriteFailure {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A ranged request was answered with the whole resource.
    #[error("server ignored Range header for {url} (HTTP {status})")]
    RangeIgnored {
        /// The requested URL.
        url: String,
        /// The status that was returned instead of 206.
        status: u16,
    },

    /// The body ended before the requested byte count arrived.
    #[error("incomplete body from {url}: expected {expected} bytes, received {received}")]
    IncompleteBody {
        /// The requested URL.
        url: String,
        /// Bytes the range asked for.
        expected: u64,
        /// Bytes actually delivered.
        received: u64,
    },

    /// A chunk exhausted its retry budget.
    #[error("chunk {index} (bytes {start}-{end}) failed after {attempts} attempts: {source}")]
    ChunkFailed {
        /// Chunk index within the partition.
        index: usize,
        /// First byte of the range.
        start: u64,
        /// Last byte of the range (inclusive).
        end: u64,
        /// Attempts made, including the first.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        source: Box<DownloadError>,
    },

    /// Finished file size does not match the advertised length.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// File that failed verification.
        path: PathBuf,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },

    /// Finished file does not match the expected SHA-256 digest.
    #[error("sha256 mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        /// File that failed verification.
        path: PathBuf,
        /// Expected lowercase hex digest.
        expected: String,
        /// Computed lowercase hex digest.
        actual: String,
    },

    /// Engine options failed validation.
    #[error("invalid download options: {source}")]
    InvalidOptions {
        /// The validation error.
        #[source]
        source: EngineError,
    },

    /// A transfer task ended without reporting a result.
    #[error("transfer task aborted: {reason}")]
    TaskAborted {
        /// Join error description.
        reason: String,
    },

    /// An HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// The transfer was cancelled, or the connection pool is shut down.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a probe failure.
    pub fn probe_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProbeFailed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a redirect-limit error.
    pub fn too_many_redirects(url: impl Into<String>) -> Self {
        Self::TooManyRedirects { url: url.into() }
    }

    /// Creates an unsupported status error.
    pub fn unsupported_status(url: impl Into<String>, status: u16) -> Self {
        Self::UnsupportedStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a stall timeout error.
    pub fn chunk_timeout(url: impl Into<String>) -> Self {
        Self::ChunkTimeout { url: url.into() }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a write failure.
    pub fn write_failure(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFailure {
            path: path.into(),
            source,
        }
    }

    /// Creates a range-ignored error.
    pub fn range_ignored(url: impl Into<String>, status: u16) -> Self {
        Self::RangeIgnored {
            url: url.into(),
            status,
        }
    }

    /// Creates a short-body error.
    pub fn incomplete_body(url: impl Into<String>, expected: u64, received: u64) -> Self {
        Self::IncompleteBody {
            url: url.into(),
            expected,
            received,
        }
    }

    /// Wraps the last attempt's error with the chunk that exhausted its budget.
    #[must_use]
    pub fn chunk_failed(index: usize, start: u64, end: u64, attempts: u32, source: Self) -> Self {
        Self::ChunkFailed {
            index,
            start,
            end,
            attempts,
            source: Box::new(source),
        }
    }

    /// Creates a size mismatch error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a digest mismatch error.
    pub fn hash_mismatch(
        path: impl Into<PathBuf>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::HashMismatch {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates an aborted-task error.
    pub fn task_aborted(reason: impl Into<String>) -> Self {
        Self::TaskAborted {
            reason: reason.into(),
        }
    }

    /// Maps a reqwest transport error onto the taxonomy.
    ///
    /// Redirect-limit errors become [`DownloadError::TooManyRedirects`],
    /// timeouts become [`DownloadError::ChunkTimeout`] and body decoder errors
    /// become [`DownloadError::DecodeFailure`]; anything else is a network error.
    pub fn from_transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_redirect() {
            Self::TooManyRedirects { url }
        } else if source.is_timeout() {
            Self::ChunkTimeout { url }
        } else if source.is_decode() {
            Self::DecodeFailure { url, source }
        } else {
            Self::Network { url, source }
        }
    }

    /// Returns true for [`DownloadError::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }

    /// Returns true when the connection itself failed or stalled, as opposed
    /// to the server answering with an unusable response.
    ///
    /// A server without HTTP/2 support answers the prior-knowledge preface
    /// with a GOAWAY or HTTP/1 bytes, which surfaces here as a network error.
    #[must_use]
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self.root(),
            Self::Network { .. } | Self::ChunkTimeout { .. }
        )
    }

    /// Unwraps [`DownloadError::ChunkFailed`] down to the last attempt's error.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::ChunkFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

// Variants carry the url or path the source error lacks, so conversions go
// through the helper constructors above rather than `From` impls.
