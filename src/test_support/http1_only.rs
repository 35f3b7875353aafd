//! Raw TCP server that only speaks HTTP/1.1.
//!
//! Serves one in-memory body with `Range` support over keep-alive
//! connections. A connection that opens with the HTTP/2 prior-knowledge
//! preface gets an HTTP/1.1 400 and is closed, the way an h1-only origin
//! answers an h2 client.

#![allow(clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use url::Url;

use super::socket_guard::should_skip_socket_bound_test;

const H2_PREFACE_START: &[u8] = b"PRI * HTTP/2.0";
const REJECTION: &[u8] = b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

#[derive(Debug, Default)]
struct Counters {
    h2_rejected: AtomicUsize,
    gets: AtomicUsize,
}

pub struct Http1OnlyServer {
    addr: SocketAddr,
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl Http1OnlyServer {
    /// Binds a local port, or returns `None` where sockets are unavailable.
    pub async fn start(body: Vec<u8>) -> Option<Self> {
        if should_skip_socket_bound_test() {
            return None;
        }
        let listener = TcpListener::bind("127.0.0.1:0").await.ok()?;
        let addr = listener.local_addr().ok()?;
        let counters = Arc::new(Counters::default());
        let body = Arc::new(body);

        let shared = Arc::clone(&counters);
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let body = Arc::clone(&body);
                let counters = Arc::clone(&shared);
                tokio::spawn(async move {
                    let _ = serve_connection(socket, &body, &counters).await;
                });
            }
        });
        Some(Self {
            addr,
            counters,
            task,
        })
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{path}", self.addr)).expect("valid local url")
    }

    /// Connections closed after an HTTP/2 preface.
    pub fn h2_rejected(&self) -> usize {
        self.counters.h2_rejected.load(Ordering::SeqCst)
    }

    /// GET requests answered over HTTP/1.1.
    pub fn gets(&self) -> usize {
        self.counters.gets.load(Ordering::SeqCst)
    }
}

impl Drop for Http1OnlyServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    body: &[u8],
    counters: &Counters,
) -> std::io::Result<()> {
    let mut pending = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let head_end = loop {
            if pending.starts_with(H2_PREFACE_START) {
                counters.h2_rejected.fetch_add(1, Ordering::SeqCst);
                socket.write_all(REJECTION).await?;
                return socket.shutdown().await;
            }
            if let Some(pos) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let read = socket.read(&mut buf).await?;
            if read == 0 {
                return Ok(());
            }
            pending.extend_from_slice(&buf[..read]);
        };
        let head = String::from_utf8_lossy(&pending[..head_end]).into_owned();
        pending.drain(..head_end);
        socket.write_all(&respond(&head, body, counters)).await?;
    }
}

fn respond(head: &str, body: &[u8], counters: &Counters) -> Vec<u8> {
    let mut lines = head.lines();
    let method = lines
        .next()
        .and_then(|line| line.split_whitespace().next())
        .unwrap_or_default()
        .to_string();
    let range = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("range"))
        .and_then(|(_, value)| parse_range(value));

    let total = body.len() as u64;
    let (status, content_range, slice) = match range {
        Some((start, end)) if start < total => {
            let end = end.unwrap_or(total - 1).min(total - 1);
            (
                "206 Partial Content",
                format!("Content-Range: bytes {start}-{end}/{total}\r\n"),
                &body[start as usize..=end as usize],
            )
        }
        _ => ("200 OK", String::new(), body),
    };

    let mut response = format!(
        "HTTP/1.1 {status}\r\nAccept-Ranges: bytes\r\nContent-Length: {}\r\n{content_range}\r\n",
        slice.len()
    )
    .into_bytes();
    if method != "HEAD" {
        counters.gets.fetch_add(1, Ordering::SeqCst);
        response.extend_from_slice(slice);
    }
    response
}

fn parse_range(raw: &str) -> Option<(u64, Option<u64>)> {
    let (start, end) = raw.trim().strip_prefix("bytes=")?.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => None,
        value => Some(value.parse().ok()?),
    };
    Some((start, end))
}
