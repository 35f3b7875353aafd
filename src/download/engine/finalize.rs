use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument};

use super::DownloadTask;
use crate::download::DownloadError;
use crate::download::resume::ResumeStore;

const HASH_BUFFER_BYTES: usize = 64 * 1024;

/// What finalize verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct FinalizedFile {
    pub(super) size: u64,
    pub(super) sha256: String,
    pub(super) sha256_verified: bool,
}

/// Hashes and verifies the temp file, renames it into place and drops the
/// sidecar.
///
/// The digest is always computed. On a size or digest mismatch the temp file
/// and sidecar stay on disk.
#[instrument(level = "debug", skip_all, fields(destination = %task.destination.display()))]
pub(super) async fn finalize(
    task: &DownloadTask,
    store: &ResumeStore,
    expected_sha256: Option<&str>,
) -> Result<FinalizedFile, DownloadError> {
    let temp = store.temp_path();
    let size = tokio::fs::metadata(temp)
        .await
        .map_err(|e| DownloadError::write_failure(temp, e))?
        .len();

    if let Some(total) = task.total_bytes
        && size != total
    {
        return Err(DownloadError::integrity(temp, total, size));
    }

    let sha256 = sha256_file(temp).await?;
    if let Some(expected) = expected_sha256 {
        if !sha256.eq_ignore_ascii_case(expected.trim()) {
            return Err(DownloadError::hash_mismatch(temp, expected.trim(), sha256));
        }
        debug!(sha256 = %sha256, "digest verified");
    }

    tokio::fs::rename(temp, &task.destination)
        .await
        .map_err(|e| DownloadError::write_failure(&task.destination, e))?;
    store.remove_sidecar().await;
    info!(size, sha256 = %sha256, "file finalized");

    Ok(FinalizedFile {
        size,
        sha256,
        sha256_verified: expected_sha256.is_some(),
    })
}

/// Lowercase hex SHA-256 of a file.
async fn sha256_file(path: &Path) -> Result<String, DownloadError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| DownloadError::write_failure(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_BYTES];
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|e| DownloadError::write_failure(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
