//! Byte-range partitioning and per-chunk bookkeeping.
//!
//! A transfer of `[resume_offset, total)` is split into near-equal,
//! contiguous [`Chunk`]s. The [`ChunkTable`] records how many bytes of each
//! chunk reached the disk so the orchestrator can compute the contiguous
//! committed prefix that a resume record may safely claim.

use std::sync::{Mutex, PoisonError};

/// An inclusive byte range `start..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
}

impl ByteRange {
    /// Creates a range; `end` is inclusive.
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; a range covers at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Range` header value for this range.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Lifecycle of a chunk. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// Not yet scheduled.
    Pending,
    /// A fetch attempt is running.
    InFlight,
    /// All bytes committed.
    Done,
    /// Retry budget exhausted or aborted.
    Failed,
}

/// One independently fetched slice of the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the partition.
    pub index: usize,
    /// Byte range to fetch.
    pub range: ByteRange,
    /// Current lifecycle state.
    pub status: ChunkStatus,
}

/// Splits `[resume_offset, total)` into at most `connections` near-equal ranges.
///
/// Lengths differ by at most one byte; earlier chunks take the remainder.
/// Returns an empty vector when nothing is left to fetch.
#[must_use]
pub fn partition(resume_offset: u64, total: u64, connections: usize) -> Vec<Chunk> {
    let remaining = total.saturating_sub(resume_offset);
    if remaining == 0 || connections == 0 {
        return Vec::new();
    }

    let count = (connections as u64).min(remaining);
    let base = remaining / count;
    let extra = remaining % count;

    let mut chunks = Vec::with_capacity(usize::try_from(count).unwrap_or(connections));
    let mut start = resume_offset;
    for index in 0..count {
        let len = base + u64::from(index < extra);
        chunks.push(Chunk {
            index: usize::try_from(index).unwrap_or(usize::MAX),
            range: ByteRange::new(start, start + len - 1),
            status: ChunkStatus::Pending,
        });
        start += len;
    }
    chunks
}

#[derive(Debug)]
struct ChunkEntry {
    chunk: Chunk,
    committed: u64,
}

/// Shared status and committed-byte counts for a partition.
#[derive(Debug)]
pub struct ChunkTable {
    entries: Mutex<Vec<ChunkEntry>>,
    end: u64,
}

impl ChunkTable {
    /// Creates a table for the given partition; `end` is the total length.
    #[must_use]
    pub fn new(chunks: &[Chunk], end: u64) -> Self {
        let entries = chunks
            .iter()
            .map(|chunk| ChunkEntry {
                chunk: *chunk,
                committed: 0,
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
            end,
        }
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut Vec<ChunkEntry>) -> T) -> T {
        let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Moves a chunk to `status`. Terminal chunks keep their state.
    pub fn set_status(&self, index: usize, status: ChunkStatus) {
        self.with_entries(|entries| {
            if let Some(entry) = entries.get_mut(index)
                && !matches!(entry.chunk.status, ChunkStatus::Done | ChunkStatus::Failed)
            {
                entry.chunk.status = status;
            }
        });
    }

    /// Current status of a chunk.
    #[must_use]
    pub fn status(&self, index: usize) -> Option<ChunkStatus> {
        self.with_entries(|entries| entries.get(index).map(|entry| entry.chunk.status))
    }

    /// Records `bytes` more committed bytes for a chunk.
    pub fn add_committed(&self, index: usize, bytes: u64) {
        self.with_entries(|entries| {
            if let Some(entry) = entries.get_mut(index) {
                entry.committed = (entry.committed + bytes).min(entry.chunk.range.len());
            }
        });
    }

    /// Forgets a chunk's committed bytes before a retry; returns the count dropped.
    pub fn reset_committed(&self, index: usize) -> u64 {
        self.with_entries(|entries| {
            entries
                .get_mut(index)
                .map_or(0, |entry| std::mem::take(&mut entry.committed))
        })
    }

    /// End offset (exclusive) of the longest fully committed run from the partition start.
    #[must_use]
    pub fn contiguous_prefix(&self) -> u64 {
        self.with_entries(|entries| {
            for entry in entries.iter() {
                if entry.committed < entry.chunk.range.len() {
                    return entry.chunk.range.start + entry.committed;
                }
            }
            self.end
        })
    }

    /// Snapshot of every chunk.
    #[must_use]
    pub fn chunks(&self) -> Vec<Chunk> {
        self.with_entries(|entries| entries.iter().map(|entry| entry.chunk).collect())
    }
}
