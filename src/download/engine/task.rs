//! Per-invocation transfer state and the orchestrator's state machine.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, warn};
use url::Url;

use crate::download::pool::Protocol;
use crate::download::probe::Capabilities;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    /// Resume state is being inspected.
    Init,
    /// Capabilities are being determined.
    Probing,
    /// One GET streams the whole remainder.
    SingleStream,
    /// Concurrent ranged GETs fill the remainder.
    ParallelChunks,
    /// Verifying and renaming the temp file.
    Finalizing,
    /// Destination file is in place.
    Done,
    /// The transfer stopped with an error.
    Failed,
}

impl DownloadState {
    /// True for [`Done`](Self::Done) and [`Failed`](Self::Failed).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether the machine may move from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use DownloadState::{
            Done, Failed, Finalizing, Init, ParallelChunks, Probing, SingleStream,
        };
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Init, Probing)
            | (Probing, SingleStream | ParallelChunks | Finalizing)
            | (ParallelChunks, SingleStream)
            | (SingleStream | ParallelChunks, Finalizing)
            | (Finalizing, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Probing => "probing",
            Self::SingleStream => "single-stream",
            Self::ParallelChunks => "parallel-chunks",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How the body is transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One request for the whole remainder.
    SingleStream,
    /// One ranged request per chunk.
    ParallelChunks,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleStream => f.write_str("single-stream"),
            Self::ParallelChunks => f.write_str("parallel"),
        }
    }
}

/// One download invocation.
///
/// Fields other than `state` are fixed once probing completes.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// URL as requested; resume records are keyed by it.
    pub source_url: Url,
    /// URL transfer requests go to (after redirects).
    pub url: Url,
    /// Final destination path.
    pub destination: PathBuf,
    /// Resource length when known.
    pub total_bytes: Option<u64>,
    /// Transport and range support.
    pub capabilities: Capabilities,
    /// Maximum concurrent chunk fetches.
    pub connections: usize,
    state: DownloadState,
}

impl DownloadTask {
    /// Creates a task in [`DownloadState::Init`].
    #[must_use]
    pub fn new(url: Url, destination: PathBuf, connections: usize) -> Self {
        Self {
            source_url: url.clone(),
            url,
            destination,
            total_bytes: None,
            capabilities: Capabilities::NoRanges(Protocol::Http1),
            connections,
            state: DownloadState::Init,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> DownloadState {
        self.state
    }

    /// Moves to `next`; illegal moves are logged and ignored.
    pub fn transition(&mut self, next: DownloadState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "ignoring illegal state transition");
            return false;
        }
        debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
        true
    }

    /// Records what the probe (or a resume record) established.
    pub fn apply_probe(&mut self, capabilities: Capabilities, total_bytes: Option<u64>, url: Url) {
        self.capabilities = capabilities;
        self.total_bytes = total_bytes;
        self.url = url;
    }

    /// Parallel chunks need range support and a known length of at least one chunk.
    #[must_use]
    pub fn choose_strategy(&self, chunk_size_bytes: u64) -> Strategy {
        match self.total_bytes {
            Some(total) if self.capabilities.accepts_ranges() && total >= chunk_size_bytes => {
                Strategy::ParallelChunks
            }
            _ => Strategy::SingleStream,
        }
    }
}
