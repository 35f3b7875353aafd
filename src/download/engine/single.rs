//! Single-stream transfer: one request for the whole remainder.

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use super::{TransferContext, backoff, restart_from_zero};
use crate::download::DownloadError;
use crate::download::fetcher::{ByteSink, FetchRange, FetchRequest, fetch};
use crate::download::retry::{RetryDecision, classify_error};

/// Appends a sequential body to the temp file.
struct StreamSink<'a> {
    ctx: &'a TransferContext,
    committed: u64,
}

impl ByteSink for StreamSink<'_> {
    async fn deliver(&mut self, offset: u64, bytes: Bytes) -> Result<(), DownloadError> {
        let len = bytes.len() as u64;
        self.ctx.writes.write_at(offset, bytes).await?;
        self.committed = offset + len;
        self.ctx.progress.add(len);
        if self.ctx.progress.checkpoint_due() {
            self.ctx
                .checkpoints
                .save(&self.ctx.writes, self.committed)
                .await;
        }
        Ok(())
    }
}

/// Streams the resource from `start`.
///
/// With `ranged` set, a retry continues from the last committed byte;
/// otherwise every attempt starts over from offset 0.
#[instrument(level = "debug", skip(ctx), fields(url = %ctx.url))]
pub(super) async fn run(ctx: &TransferContext, start: u64, ranged: bool) -> Result<u64, DownloadError> {
    let mut ranged = ranged;
    let mut sink = StreamSink {
        ctx,
        committed: start,
    };
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if ctx.cancel.is_cancelled() {
            ctx.checkpoints.preserve(&ctx.writes, sink.committed).await;
            return Err(DownloadError::Cancelled);
        }

        let range = match sink.committed {
            0 => FetchRange::Full,
            offset if ranged => FetchRange::From(offset),
            offset => {
                debug!(offset, "server cannot resume mid-stream; restarting from 0");
                restart_from_zero(ctx).await?;
                sink.committed = 0;
                FetchRange::Full
            }
        };

        let session = ctx.session()?;
        let request = FetchRequest {
            url: &ctx.url,
            range,
            stall_timeout: ctx.stall_timeout,
            cancel: &ctx.cancel,
        };

        let error = match fetch(&session, request, &mut sink).await {
            Ok(bytes) => {
                debug!(bytes, attempt, "stream complete");
                return Ok(sink.committed.saturating_sub(start));
            }
            Err(error) => error,
        };

        if error.is_cancelled() {
            ctx.checkpoints.preserve(&ctx.writes, sink.committed).await;
            return Err(error);
        }
        if ranged && matches!(error, DownloadError::RangeIgnored { .. }) {
            warn!("server ignored Range on resume; restarting from 0");
            ranged = false;
            continue;
        }
        ctx.note_failure(&session, &error);

        match ctx.policy.should_retry(classify_error(&error), attempt) {
            RetryDecision::Retry { delay, attempt: next } => {
                info!(
                    attempt = next,
                    max_attempts = ctx.policy.max_attempts(),
                    resume_at = if ranged { sink.committed } else { 0 },
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "retrying stream"
                );
                if let Err(cancelled) = backoff(&ctx.cancel, delay).await {
                    ctx.checkpoints.preserve(&ctx.writes, sink.committed).await;
                    return Err(cancelled);
                }
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(%reason, "not retrying stream");
                ctx.checkpoints.preserve(&ctx.writes, sink.committed).await;
                return Err(match ctx.total_bytes {
                    Some(total) if total > start => {
                        DownloadError::chunk_failed(0, start, total - 1, attempt, error)
                    }
                    _ => error,
                });
            }
        }
    }
}
