//! Constants for the download module (timeouts, pool sizing, throttles, on-disk names).

use std::time::Duration;

/// Default number of concurrent range connections per download.
pub const DEFAULT_CONNECTIONS: usize = 8;

/// Minimum allowed connection count.
pub const MIN_CONNECTIONS: usize = 1;

/// Maximum allowed connection count.
pub const MAX_CONNECTIONS: usize = 64;

/// Resources smaller than this are fetched with a single stream (1 MiB).
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 1024 * 1024;

/// Smallest accepted chunk-size threshold (256 KiB).
pub const MIN_CHUNK_SIZE_BYTES: u64 = 256 * 1024;

/// Timeout for probe / metadata requests.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A transfer with no forward progress for this long is aborted.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP connect timeout for both transports.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum redirect hops followed before failing.
pub const MAX_REDIRECTS: usize = 5;

/// Upper bound on in-flight HTTP/1.1 requests per scheme group.
pub const HTTP1_MAX_SOCKETS: usize = 50;

/// Idle keep-alive sockets retained per host.
///
/// reqwest only bounds idle sockets per host, not per client. A transfer
/// talks to one host after redirects, so per host and per scheme group
/// coincide for a single download.
pub const HTTP1_MAX_IDLE_PER_HOST: usize = 10;

/// Idle keep-alive sockets are closed after this long.
pub const HTTP1_IDLE_TIMEOUT: Duration = Duration::from_secs(4);

/// TCP keep-alive probe interval.
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(1);

/// Initial HTTP/2 stream flow-control window (1 MiB).
pub const HTTP2_STREAM_WINDOW: u32 = 1_048_576;

/// Minimum interval between progress renders (10 Hz).
pub const RENDER_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum interval between resume checkpoints.
pub const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5);

/// Suffix of the in-progress data file.
pub const TEMP_EXTENSION: &str = "tmp";

/// Suffix of the resume sidecar.
pub const SIDECAR_EXTENSION: &str = "crdownload";

/// Default output directory for finished downloads.
pub const DEFAULT_OUTPUT_DIR: &str = "downloads";

/// Bounded depth of the write coordinator's queue.
pub const WRITE_QUEUE_CAPACITY: usize = 64;
