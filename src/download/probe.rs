//! Protocol probe: transport, length and range support for a URL.
//!
//! The probe sends a metadata-only HEAD request through the connection pool,
//! following up to five redirects. For `https` URLs it tries HTTP/2 first and
//! falls back to HTTP/1.1 on any failure; a transport-level HTTP/2 failure also
//! downgrades the authority in the pool so chunk fetches do not retry it.

use std::time::Duration;

use reqwest::Method;
use reqwest::header::{ACCEPT_ENCODING, ACCEPT_RANGES, CONTENT_LENGTH, HeaderMap};
use tracing::{debug, info, instrument};
use url::Url;

use super::DownloadError;
use super::pool::{ConnectionPool, Protocol};

/// What the server supports, as one value so protocol and range support
/// cannot disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capabilities {
    /// HTTP/2 with byte ranges.
    Http2Ranged,
    /// HTTP/1.1 with byte ranges.
    Http1Ranged,
    /// No declared range support, on the given protocol.
    NoRanges(Protocol),
}

impl Capabilities {
    /// Combines a protocol with a range-support flag.
    #[must_use]
    pub fn new(protocol: Protocol, accepts_ranges: bool) -> Self {
        match (protocol, accepts_ranges) {
            (Protocol::Http2, true) => Self::Http2Ranged,
            (Protocol::Http1, true) => Self::Http1Ranged,
            (protocol, false) => Self::NoRanges(protocol),
        }
    }

    /// Transport to use for transfer requests.
    #[must_use]
    pub fn protocol(self) -> Protocol {
        match self {
            Self::Http2Ranged => Protocol::Http2,
            Self::Http1Ranged => Protocol::Http1,
            Self::NoRanges(protocol) => protocol,
        }
    }

    /// True when ranged GETs may be issued.
    #[must_use]
    pub fn accepts_ranges(self) -> bool {
        !matches!(self, Self::NoRanges(_))
    }
}

/// Result of a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Negotiated transport and range support.
    pub capabilities: Capabilities,
    /// `Content-Length` of the resource, when declared.
    pub total_bytes: Option<u64>,
    /// URL after following redirects.
    pub final_url: Url,
}

/// Probes `url` for transport, length and range support.
///
/// # Errors
///
/// Returns [`DownloadError::TooManyRedirects`] when the redirect chain exceeds
/// the hop limit, [`DownloadError::Cancelled`] if the pool is shut down, and
/// [`DownloadError::ProbeFailed`] for every other failure.
#[instrument(skip(pool, url), fields(url = %url))]
pub async fn probe(
    pool: &ConnectionPool,
    url: &Url,
    use_http2: bool,
    timeout: Duration,
) -> Result<ProbeResult, DownloadError> {
    if use_http2 && url.scheme() == "https" && !pool.is_downgraded(url) {
        match head(pool, url, Protocol::Http2, timeout).await {
            Ok(result) => {
                info!(capabilities = ?result.capabilities, total = ?result.total_bytes, "probe complete");
                return Ok(result);
            }
            Err(error @ (DownloadError::TooManyRedirects { .. } | DownloadError::Cancelled)) => {
                return Err(error);
            }
            Err(error) => {
                debug!(error = %error, "HTTP/2 probe failed; falling back to HTTP/1.1");
                if error.is_transport_failure() {
                    pool.downgrade(url);
                }
            }
        }
    }

    match head(pool, url, Protocol::Http1, timeout).await {
        Ok(result) => {
            info!(capabilities = ?result.capabilities, total = ?result.total_bytes, "probe complete");
            Ok(result)
        }
        Err(
            error @ (DownloadError::TooManyRedirects { .. }
            | DownloadError::ProbeFailed { .. }
            | DownloadError::Cancelled),
        ) => Err(error),
        Err(error) => Err(DownloadError::probe_failed(url.as_str(), error.to_string())),
    }
}

async fn head(
    pool: &ConnectionPool,
    url: &Url,
    protocol: Protocol,
    timeout: Duration,
) -> Result<ProbeResult, DownloadError> {
    let session = pool.acquire(url, protocol)?;
    let _permit = session.permit().await?;

    let response = session
        .request(Method::HEAD, url)
        .header(ACCEPT_ENCODING, "identity")
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| DownloadError::from_transport(url.as_str(), e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::probe_failed(
            url.as_str(),
            format!("HEAD returned HTTP {}", status.as_u16()),
        ));
    }

    let headers = response.headers();
    Ok(ProbeResult {
        capabilities: Capabilities::new(protocol, declares_byte_ranges(headers)),
        total_bytes: content_length(headers),
        final_url: response.url().clone(),
    })
}

/// True only when `Accept-Ranges` explicitly lists `bytes`.
fn declares_byte_ranges(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.split(',')
                .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
        })
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}
