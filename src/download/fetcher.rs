//! Chunk fetcher: one GET, streamed into a sink.
//!
//! A fetch is an explicit sequence of suspension points: wait for a socket
//! slot, wait for response headers, then repeatedly wait for the next body
//! buffer. Each wait races the shared cancellation token, and every network
//! wait is bounded by the stall timeout. Bytes are delivered buffer by buffer,
//! so memory use does not grow with the chunk size.
//!
//! The same code drives both transports; the [`Session`] decides whether the
//! request goes out as HTTP/1.1 or as a stream on a shared HTTP/2 connection.
//! Content-Encoding (gzip, deflate, br) is decoded by the client before
//! delivery, so offsets and byte counts refer to decoded bytes.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_RANGE, HeaderMap, RANGE};
use reqwest::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};
use url::Url;

use super::DownloadError;
use super::chunk::ByteRange;
use super::pool::Session;

/// Destination for fetched bytes.
pub trait ByteSink: Send {
    /// Accepts `bytes` belonging at absolute `offset`.
    ///
    /// Calls for one fetch arrive with strictly increasing offsets.
    fn deliver(
        &mut self,
        offset: u64,
        bytes: Bytes,
    ) -> impl Future<Output = Result<(), DownloadError>> + Send;
}

/// Which part of the resource to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchRange {
    /// The whole resource, no `Range` header.
    Full,
    /// From an offset to the end (`bytes=N-`).
    From(u64),
    /// An exact inclusive slice (`bytes=S-E`).
    Slice(ByteRange),
}

impl FetchRange {
    fn start(self) -> u64 {
        match self {
            Self::Full => 0,
            Self::From(start) => start,
            Self::Slice(range) => range.start,
        }
    }

    fn header_value(self) -> Option<String> {
        match self {
            Self::Full => None,
            Self::From(start) => Some(format!("bytes={start}-")),
            Self::Slice(range) => Some(range.header_value()),
        }
    }

    fn expected_len(self) -> Option<u64> {
        match self {
            Self::Slice(range) => Some(range.len()),
            Self::Full | Self::From(_) => None,
        }
    }
}

/// Parameters for one fetch attempt.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    /// Target URL.
    pub url: &'a Url,
    /// Requested bytes.
    pub range: FetchRange,
    /// Abort when no headers or body bytes arrive for this long.
    pub stall_timeout: Duration,
    /// Shared cancellation signal.
    pub cancel: &'a CancellationToken,
}

/// Performs one GET and streams the body into `sink`.
///
/// Returns the number of bytes delivered.
///
/// # Errors
///
/// - [`DownloadError::RangeIgnored`] when a ranged request gets 200 (the full body)
///   or a 206 for a different range; nothing is delivered in that case.
/// - [`DownloadError::UnsupportedStatus`] for any status other than 200/206.
/// - [`DownloadError::ChunkTimeout`] when headers or the next buffer stall.
/// - [`DownloadError::IncompleteBody`] when a slice ends early.
/// - [`DownloadError::Cancelled`] when the token fires.
/// - Transport, decode and sink errors as they occur.
#[instrument(
    level = "debug",
    skip_all,
    fields(url = %request.url, range = ?request.range, protocol = %session.protocol())
)]
pub async fn fetch<S: ByteSink>(
    session: &Session,
    request: FetchRequest<'_>,
    sink: &mut S,
) -> Result<u64, DownloadError> {
    let FetchRequest {
        url,
        range,
        stall_timeout,
        cancel,
    } = request;

    if cancel.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }
    let _permit = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(DownloadError::Cancelled),
        permit = session.permit() => permit?,
    };

    let mut builder = session.request(Method::GET, url);
    if let Some(value) = range.header_value() {
        builder = builder.header(RANGE, value).header(ACCEPT_ENCODING, "identity");
    }

    let response = guarded(cancel, stall_timeout, url, builder.send())
        .await?
        .map_err(|e| DownloadError::from_transport(url.as_str(), e))?;

    check_status(url, range, response.status(), response.headers())?;
    debug!(status = response.status().as_u16(), "response accepted");

    let limit = range.expected_len();
    let mut offset = range.start();
    let mut received: u64 = 0;
    let mut stream = response.bytes_stream();

    loop {
        let Some(item) = guarded(cancel, stall_timeout, url, stream.next()).await? else {
            break;
        };
        let mut bytes = item.map_err(|e| DownloadError::from_transport(url.as_str(), e))?;

        if let Some(limit) = limit {
            let allowed = limit - received;
            if (bytes.len() as u64) > allowed {
                trace!(extra = bytes.len() as u64 - allowed, "discarding bytes past range end");
                bytes.truncate(usize::try_from(allowed).unwrap_or(usize::MAX));
            }
        }
        if bytes.is_empty() {
            continue;
        }

        let len = bytes.len() as u64;
        sink.deliver(offset, bytes).await?;
        offset += len;
        received += len;

        if limit == Some(received) {
            break;
        }
    }

    if let Some(expected) = limit
        && received < expected
    {
        return Err(DownloadError::incomplete_body(url.as_str(), expected, received));
    }

    debug!(received, "fetch complete");
    Ok(received)
}

/// Races `future` against cancellation and the stall timeout.
async fn guarded<F: Future>(
    cancel: &CancellationToken,
    stall_timeout: Duration,
    url: &Url,
    future: F,
) -> Result<F::Output, DownloadError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DownloadError::Cancelled),
        outcome = tokio::time::timeout(stall_timeout, future) => {
            outcome.map_err(|_| DownloadError::chunk_timeout(url.as_str()))
        }
    }
}

fn check_status(
    url: &Url,
    range: FetchRange,
    status: StatusCode,
    headers: &HeaderMap,
) -> Result<(), DownloadError> {
    let ranged = !matches!(range, FetchRange::Full);
    match status {
        StatusCode::OK if ranged => Err(DownloadError::range_ignored(url.as_str(), 200)),
        StatusCode::OK => Ok(()),
        StatusCode::PARTIAL_CONTENT if ranged => {
            match content_range_start(headers) {
                Some(start) if start != range.start() => {
                    Err(DownloadError::range_ignored(url.as_str(), 206))
                }
                _ => Ok(()),
            }
        }
        StatusCode::PARTIAL_CONTENT => Ok(()),
        other => Err(DownloadError::unsupported_status(url.as_str(), other.as_u16())),
    }
}

/// First byte offset from `Content-Range: bytes S-E/T`.
fn content_range_start(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = rest.split_once('-')?;
    start.trim().parse().ok()
}
