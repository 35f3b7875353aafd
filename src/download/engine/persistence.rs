use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::download::resume::{ResumeRecord, ResumeStore};
use crate::download::writer::WriteHandle;

/// Saves resume checkpoints for one transfer.
///
/// Failures are logged and swallowed: a missed checkpoint only costs
/// re-downloaded bytes on the next run.
#[derive(Debug)]
pub(super) struct Checkpointer {
    store: ResumeStore,
    url: String,
    total_bytes: Option<u64>,
    sync: bool,
    serial: Mutex<()>,
}

impl Checkpointer {
    pub(super) fn new(store: ResumeStore, url: String, total_bytes: Option<u64>, sync: bool) -> Self {
        Self {
            store,
            url,
            total_bytes,
            sync,
            serial: Mutex::new(()),
        }
    }

    /// Flushes pending writes and records `downloaded` contiguous bytes.
    pub(super) async fn save(&self, writes: &WriteHandle, downloaded: u64) {
        let Some(total) = self.total_bytes.filter(|total| *total > 0) else {
            return;
        };
        let _guard = self.serial.lock().await;

        if let Err(error) = writes.flush(self.sync).await {
            warn!(error = %error, "failed to flush before checkpoint");
            return;
        }
        let record = ResumeRecord::new(
            self.url.clone(),
            total,
            downloaded.min(total),
            self.store.temp_path(),
        );
        if let Err(error) = self.store.save(&record).await {
            warn!(error = %error, "failed to save resume checkpoint");
        }
    }

    /// Cuts the temp file back to `prefix` and records it, so the pair
    /// validates on the next run.
    pub(super) async fn preserve(&self, writes: &WriteHandle, prefix: u64) {
        if self.total_bytes.is_none() {
            return;
        }
        debug!(prefix, "preserving partial download");
        if let Err(error) = writes.truncate(prefix).await {
            warn!(error = %error, "failed to truncate temp file to committed prefix");
            return;
        }
        self.save(writes, prefix).await;
    }
}
