//! Parallel-chunk transfer.
//!
//! Each chunk runs in its own task, bounded by a semaphore sized to the
//! connection count. The first chunk to fail for good cancels its siblings;
//! the temp file is then cut back to the contiguous committed prefix.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{TransferContext, backoff};
use crate::download::DownloadError;
use crate::download::chunk::{Chunk, ChunkStatus, ChunkTable, partition};
use crate::download::fetcher::{ByteSink, FetchRange, FetchRequest, fetch};
use crate::download::retry::{RetryDecision, classify_error};

/// Delivers one chunk's bytes to disk, progress and the chunk table.
struct ChunkSink<'a> {
    ctx: &'a TransferContext,
    table: &'a ChunkTable,
    index: usize,
}

impl ByteSink for ChunkSink<'_> {
    async fn deliver(&mut self, offset: u64, bytes: Bytes) -> Result<(), DownloadError> {
        let len = bytes.len() as u64;
        self.ctx.writes.write_at(offset, bytes).await?;
        self.table.add_committed(self.index, len);
        self.ctx.progress.add(len);
        if self.ctx.progress.checkpoint_due() {
            self.ctx
                .checkpoints
                .save(&self.ctx.writes, self.table.contiguous_prefix())
                .await;
        }
        Ok(())
    }
}

/// Fetches `[resume_offset, total)` as concurrent ranged requests.
///
/// Returns the number of bytes fetched.
pub(super) async fn run(ctx: &Arc<TransferContext>, resume_offset: u64) -> Result<u64, DownloadError> {
    let total = ctx.total_bytes.unwrap_or(resume_offset);
    let chunks = partition(resume_offset, total, ctx.connections);
    let table = Arc::new(ChunkTable::new(&chunks, total));
    let limiter = Arc::new(Semaphore::new(ctx.connections.max(1)));
    let abort = ctx.cancel.child_token();

    info!(chunks = chunks.len(), resume_offset, total, "starting parallel transfer");

    let mut set = JoinSet::new();
    for chunk in chunks {
        let ctx = Arc::clone(ctx);
        let table = Arc::clone(&table);
        let limiter = Arc::clone(&limiter);
        let abort = abort.clone();
        set.spawn(async move {
            let _slot = limiter
                .acquire_owned()
                .await
                .map_err(|_| DownloadError::Cancelled)?;
            run_chunk(&ctx, &table, chunk, &abort).await
        });
    }

    let mut fetched = 0u64;
    let mut first_error: Option<DownloadError> = None;
    while let Some(joined) = set.join_next().await {
        let outcome = joined.unwrap_or_else(|e| Err(DownloadError::task_aborted(e.to_string())));
        match outcome {
            Ok(bytes) => fetched += bytes,
            Err(error) if first_error.is_none() => {
                if !error.is_cancelled() {
                    warn!(error = %error, "chunk failed; aborting remaining chunks");
                }
                abort.cancel();
                first_error = Some(error);
            }
            Err(error) => debug!(error = %error, "sibling chunk stopped"),
        }
    }

    if let Some(error) = first_error {
        ctx.checkpoints
            .preserve(&ctx.writes, table.contiguous_prefix())
            .await;
        return Err(error);
    }

    debug!(fetched, "all chunks complete");
    Ok(fetched)
}

/// Fetches one chunk, retrying the same byte range under the retry policy.
#[instrument(
    level = "debug",
    skip(ctx, table, abort),
    fields(index = chunk.index, start = chunk.range.start, end = chunk.range.end)
)]
async fn run_chunk(
    ctx: &TransferContext,
    table: &ChunkTable,
    chunk: Chunk,
    abort: &CancellationToken,
) -> Result<u64, DownloadError> {
    let index = chunk.index;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if abort.is_cancelled() {
            table.set_status(index, ChunkStatus::Failed);
            return Err(DownloadError::Cancelled);
        }
        table.set_status(index, ChunkStatus::InFlight);

        let session = ctx.session()?;
        let mut sink = ChunkSink { ctx, table, index };
        let request = FetchRequest {
            url: &ctx.url,
            range: FetchRange::Slice(chunk.range),
            stall_timeout: ctx.stall_timeout,
            cancel: abort,
        };

        let error = match fetch(&session, request, &mut sink).await {
            Ok(bytes) => {
                table.set_status(index, ChunkStatus::Done);
                debug!(bytes, attempt, "chunk complete");
                return Ok(bytes);
            }
            Err(error) => error,
        };

        if error.is_cancelled() {
            table.set_status(index, ChunkStatus::Failed);
            return Err(error);
        }
        ctx.note_failure(&session, &error);

        match ctx.policy.should_retry(classify_error(&error), attempt) {
            RetryDecision::Retry { delay, attempt: next } => {
                let dropped = table.reset_committed(index);
                ctx.progress.rewind(dropped);
                info!(
                    attempt = next,
                    max_attempts = ctx.policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "retrying chunk"
                );
                if let Err(cancelled) = backoff(abort, delay).await {
                    table.set_status(index, ChunkStatus::Failed);
                    return Err(cancelled);
                }
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(%reason, "not retrying chunk");
                table.set_status(index, ChunkStatus::Failed);
                return Err(DownloadError::chunk_failed(
                    index,
                    chunk.range.start,
                    chunk.range.end,
                    attempt,
                    error,
                ));
            }
        }
    }
}
