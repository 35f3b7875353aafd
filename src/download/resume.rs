//! Resume sidecar persistence.
//!
//! A partial transfer leaves two files beside the destination:
//! `<name>.tmp` holding the bytes received so far and `<name>.crdownload`
//! holding a JSON [`ResumeRecord`]. A record is only trusted when it names the
//! same URL and the temp file is exactly `downloadedBytes` long; anything else
//! is discarded together with the temp file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::DownloadError;
use super::constants::{SIDECAR_EXTENSION, TEMP_EXTENSION};

/// Persisted resume state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRecord {
    /// URL the partial data came from.
    pub url: String,
    /// Full resource length.
    pub total_bytes: u64,
    /// Contiguous bytes present at the start of the temp file.
    pub downloaded_bytes: u64,
    /// Unix time of the checkpoint in milliseconds.
    pub timestamp: u64,
    /// Location of the temp file.
    pub temp_path: PathBuf,
}

impl ResumeRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        total_bytes: u64,
        downloaded_bytes: u64,
        temp_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            url: url.into(),
            total_bytes,
            downloaded_bytes,
            timestamp: unix_millis(),
            temp_path: temp_path.into(),
        }
    }
}

/// Outcome of inspecting the on-disk state for a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeState {
    /// Nothing usable; start from offset 0.
    Fresh,
    /// Continue from `record.downloaded_bytes`.
    Resume(ResumeRecord),
}

/// Sidecar and temp file locations for one destination path.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    temp_path: PathBuf,
    sidecar_path: PathBuf,
}

impl ResumeStore {
    /// Derives the temp and sidecar paths for `destination`.
    #[must_use]
    pub fn for_destination(destination: &Path) -> Self {
        Self {
            temp_path: append_extension(destination, TEMP_EXTENSION),
            sidecar_path: append_extension(destination, SIDECAR_EXTENSION),
        }
    }

    /// Path of the in-progress data file.
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Path of the JSON sidecar.
    #[must_use]
    pub fn sidecar_path(&self) -> &Path {
        &self.sidecar_path
    }

    /// Reads the sidecar. Missing or unparsable sidecars yield `None`.
    pub async fn load(&self) -> Option<ResumeRecord> {
        let raw = match tokio::fs::read(&self.sidecar_path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
            Err(error) => {
                warn!(path = %self.sidecar_path.display(), error = %error, "failed to read resume sidecar");
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(record) => Some(record),
            Err(error) => {
                warn!(path = %self.sidecar_path.display(), error = %error, "ignoring malformed resume sidecar");
                None
            }
        }
    }

    /// Writes the sidecar atomically (sibling file, then rename).
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::WriteFailure`] if the sidecar cannot be written.
    pub async fn save(&self, record: &ResumeRecord) -> Result<(), DownloadError> {
        let encoded = serde_json::to_vec(record)
            .map_err(|e| DownloadError::write_failure(&self.sidecar_path, e.into()))?;
        let staging = append_extension(&self.sidecar_path, "part");
        tokio::fs::write(&staging, encoded)
            .await
            .map_err(|e| DownloadError::write_failure(&staging, e))?;
        tokio::fs::rename(&staging, &self.sidecar_path)
            .await
            .map_err(|e| DownloadError::write_failure(&self.sidecar_path, e))?;
        debug!(
            downloaded = record.downloaded_bytes,
            total = record.total_bytes,
            "resume checkpoint saved"
        );
        Ok(())
    }

    /// Deletes the sidecar; a missing sidecar is not an error.
    pub async fn remove_sidecar(&self) {
        remove_if_present(&self.sidecar_path).await;
    }

    /// Deletes both the sidecar and the temp file.
    pub async fn discard(&self) {
        remove_if_present(&self.sidecar_path).await;
        remove_if_present(&self.temp_path).await;
    }

    /// Decides whether the on-disk state can continue a transfer of `url`.
    ///
    /// A record is accepted when its URL matches, its total is known and the
    /// temp file length equals `downloaded_bytes`. Rejected state is deleted.
    pub async fn inspect(&self, url: &str) -> ResumeState {
        let record = self.load().await;
        let temp_len = tokio::fs::metadata(&self.temp_path)
            .await
            .ok()
            .map(|meta| meta.len());

        let Some(record) = record else {
            if temp_len.is_some() {
                info!(path = %self.temp_path.display(), "discarding temp file without resume record");
                self.discard().await;
            }
            return ResumeState::Fresh;
        };

        let url_matches = record.url == url;
        let size_matches = temp_len == Some(record.downloaded_bytes);
        let sane = record.total_bytes > 0 && record.downloaded_bytes <= record.total_bytes;

        if url_matches && size_matches && sane {
            info!(
                offset = record.downloaded_bytes,
                total = record.total_bytes,
                "resuming partial download"
            );
            return ResumeState::Resume(record);
        }

        info!(
            url_matches,
            size_matches,
            temp_len = ?temp_len,
            recorded = record.downloaded_bytes,
            "discarding stale resume state"
        );
        self.discard().await;
        ResumeState::Fresh
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => warn!(path = %path.display(), error = %error, "failed to remove file"),
    }
}

/// Appends `.ext` to the full file name (`disk.iso` -> `disk.iso.tmp`).
fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(ext);
    path.with_file_name(name)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
