//! Connection pool: reusable transport handles keyed by origin.
//!
//! The pool owns one keep-alive HTTP/1.1 connection group per URL scheme and
//! one multiplexed HTTP/2 session per authority. Probe and chunk requests for
//! the same origin share these handles instead of opening their own.
//!
//! # Lifecycle
//!
//! - [`ConnectionPool::acquire`] returns the cached handle or creates it. The
//!   per-key map entry is locked during creation, so concurrent acquirers for
//!   one authority share a single creation.
//! - A session marked closed (see [`Session::mark_closed`]) is evicted and
//!   recreated on the next acquire.
//! - An authority whose HTTP/2 session failed to connect can be downgraded;
//!   later HTTP/2 acquisitions for it return the HTTP/1.1 group instead.
//! - [`ConnectionPool::shutdown`] drops every handle and rejects later use.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder, Method, RequestBuilder, Version, redirect};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument};
use url::Url;

use super::DownloadError;
use super::constants::{
    CONNECT_TIMEOUT, HTTP1_IDLE_TIMEOUT, HTTP1_MAX_IDLE_PER_HOST, HTTP1_MAX_SOCKETS,
    HTTP2_STREAM_WINDOW, MAX_REDIRECTS, TCP_KEEPALIVE,
};
use crate::user_agent;

/// Wire protocol of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// HTTP/1.1 over a keep-alive connection group.
    Http1,
    /// HTTP/2 over one multiplexed connection.
    Http2,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http1 => f.write_str("HTTP/1.1"),
            Self::Http2 => f.write_str("HTTP/2"),
        }
    }
}

/// Client settings applied to every handle the pool creates.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Advertise and transparently decode gzip/deflate/br.
    pub use_compression: bool,
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Cap on concurrent HTTP/1.1 requests per scheme group.
    pub max_http1_sockets: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            use_compression: true,
            connect_timeout: CONNECT_TIMEOUT,
            max_http1_sockets: HTTP1_MAX_SOCKETS,
        }
    }
}

/// Keep-alive HTTP/1.1 clients for one scheme, bounded by a socket semaphore.
#[derive(Debug)]
pub struct Http1Group {
    scheme: String,
    client: Client,
    permits: Arc<Semaphore>,
}

/// One multiplexed HTTP/2 connection to an authority.
#[derive(Debug)]
pub struct Http2Session {
    authority: String,
    client: Client,
    closed: AtomicBool,
}

impl Http2Session {
    /// True once the session has been marked unusable.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Shared handle returned by the pool.
#[derive(Debug, Clone)]
pub enum Session {
    /// HTTP/1.1 connection group.
    Http1(Arc<Http1Group>),
    /// HTTP/2 session.
    Http2(Arc<Http2Session>),
}

impl Session {
    /// Wire protocol of this handle.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Http1(_) => Protocol::Http1,
            Self::Http2(_) => Protocol::Http2,
        }
    }

    /// Cache key: the scheme for HTTP/1.1, the authority for HTTP/2.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Http1(group) => &group.scheme,
            Self::Http2(session) => &session.authority,
        }
    }

    /// Marks an HTTP/2 session unusable so the pool recreates it.
    pub fn mark_closed(&self) {
        if let Self::Http2(session) = self {
            session.closed.store(true, Ordering::Release);
        }
    }

    /// Builds a request on this handle's client.
    pub(crate) fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        match self {
            Self::Http1(group) => group.client.request(method, url.clone()),
            Self::Http2(session) => session
                .client
                .request(method, url.clone())
                .version(Version::HTTP_2),
        }
    }

    /// Reserves a socket slot. HTTP/2 streams share one connection and need none.
    pub(crate) async fn permit(&self) -> Result<Option<OwnedSemaphorePermit>, DownloadError> {
        match self {
            Self::Http1(group) => Arc::clone(&group.permits)
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|_| DownloadError::Cancelled),
            Self::Http2(_) => Ok(None),
        }
    }
}

/// Owner of all transport handles for a process.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    config: PoolConfig,
    http1: DashMap<String, Arc<Http1Group>>,
    http2: DashMap<String, Arc<Http2Session>>,
    downgraded: DashSet<String>,
    shut_down: AtomicBool,
}

impl ConnectionPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Returns the cached handle for `url`, creating it on first use.
    ///
    /// Requests for [`Protocol::Http2`] on a downgraded authority return the
    /// HTTP/1.1 group.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Cancelled`] after [`shutdown`](Self::shutdown),
    /// [`DownloadError::InvalidUrl`] for URLs without a host, and
    /// [`DownloadError::ClientBuild`] if the client cannot be constructed.
    #[instrument(level = "debug", skip(self, url), fields(url = %url))]
    pub fn acquire(&self, url: &Url, protocol: Protocol) -> Result<Session, DownloadError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(DownloadError::Cancelled);
        }
        let authority = authority_key(url)?;

        if protocol == Protocol::Http2 && !self.downgraded.contains(&authority) {
            return self.acquire_http2(authority).map(Session::Http2);
        }
        self.acquire_http1(url.scheme()).map(Session::Http1)
    }

    fn acquire_http2(&self, authority: String) -> Result<Arc<Http2Session>, DownloadError> {
        match self.http2.entry(authority) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_closed() {
                    return Ok(Arc::clone(entry.get()));
                }
                debug!(authority = %entry.key(), "evicting closed HTTP/2 session");
                let session = Arc::new(Http2Session {
                    authority: entry.key().clone(),
                    client: self.build_http2_client()?,
                    closed: AtomicBool::new(false),
                });
                entry.insert(Arc::clone(&session));
                Ok(session)
            }
            Entry::Vacant(entry) => {
                debug!(authority = %entry.key(), "creating HTTP/2 session");
                let session = Arc::new(Http2Session {
                    authority: entry.key().clone(),
                    client: self.build_http2_client()?,
                    closed: AtomicBool::new(false),
                });
                entry.insert(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    fn acquire_http1(&self, scheme: &str) -> Result<Arc<Http1Group>, DownloadError> {
        match self.http1.entry(scheme.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                debug!(scheme, "creating HTTP/1.1 connection group");
                let group = Arc::new(Http1Group {
                    scheme: scheme.to_string(),
                    client: self.build_http1_client()?,
                    permits: Arc::new(Semaphore::new(self.config.max_http1_sockets.max(1))),
                });
                entry.insert(Arc::clone(&group));
                Ok(group)
            }
        }
    }

    /// Routes future HTTP/2 acquisitions for `url`'s authority to HTTP/1.1.
    pub fn downgrade(&self, url: &Url) {
        let Ok(authority) = authority_key(url) else {
            return;
        };
        if self.downgraded.insert(authority.clone()) {
            info!(authority = %authority, "downgrading authority to HTTP/1.1");
        }
        self.http2.remove(&authority);
    }

    /// True when `url`'s authority has been downgraded to HTTP/1.1.
    #[must_use]
    pub fn is_downgraded(&self, url: &Url) -> bool {
        authority_key(url).is_ok_and(|authority| self.downgraded.contains(&authority))
    }

    /// Number of cached handles.
    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.http1.len() + self.http2.len()
    }

    /// Closes every handle and rejects later acquisitions.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for entry in &self.http2 {
            entry.value().closed.store(true, Ordering::Release);
        }
        let sessions = self.live_sessions();
        self.http2.clear();
        self.http1.clear();
        info!(sessions, "connection pool shut down");
    }

    /// True after [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn base_client_builder(&self) -> ClientBuilder {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        let compression = self.config.use_compression;
        Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .tcp_keepalive(TCP_KEEPALIVE)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .default_headers(headers)
            .gzip(compression)
            .brotli(compression)
            .deflate(compression)
            .user_agent(user_agent::default_download_user_agent())
    }

    fn build_http1_client(&self) -> Result<Client, DownloadError> {
        self.base_client_builder()
            .http1_only()
            .pool_max_idle_per_host(HTTP1_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(HTTP1_IDLE_TIMEOUT)
            .build()
            .map_err(|source| DownloadError::ClientBuild { source })
    }

    fn build_http2_client(&self) -> Result<Client, DownloadError> {
        self.base_client_builder()
            .http2_prior_knowledge()
            .http2_initial_stream_window_size(HTTP2_STREAM_WINDOW)
            .build()
            .map_err(|source| DownloadError::ClientBuild { source })
    }
}

/// `scheme://host:port` with the scheme's default port filled in.
fn authority_key(url: &Url) -> Result<String, DownloadError> {
    let host = url
        .host_str()
        .ok_or_else(|| DownloadError::invalid_url(url.as_str()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| DownloadError::invalid_url(url.as_str()))?;
    Ok(format!(
        "{}://{}:{port}",
        url.scheme(),
        host.to_ascii_lowercase()
    ))
}
