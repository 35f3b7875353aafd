//! Exit code logic for the isofetch process.
//!
//! Single responsibility: map the download outcome to the process exit outcome.

use isofetch_core::{DownloadError, DownloadSummary};

use crate::ProcessExit;

/// Printed when Ctrl-C interrupts a transfer.
pub(crate) const INTERRUPTED_MESSAGE: &str =
    "Download interrupted. Progress has been saved and can be resumed.";

/// Determines the process exit outcome from the engine result.
pub(crate) fn determine_exit_outcome(result: &Result<DownloadSummary, DownloadError>) -> ProcessExit {
    match result {
        Ok(_) => ProcessExit::Success,
        Err(error) if error.is_cancelled() => ProcessExit::Interrupted,
        Err(_) => ProcessExit::Failure,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use isofetch_core::Protocol;

    use super::determine_exit_outcome;
    use crate::ProcessExit;
    use isofetch_core::{DownloadError, DownloadSummary};

    fn summary() -> DownloadSummary {
        DownloadSummary {
            filename: "disk.iso".to_string(),
            path: PathBuf::from("downloads/disk.iso"),
            size: 3,
            avg_speed_bytes_per_sec: 3.0,
            duration: Duration::from_secs(1),
            protocol: Protocol::Http1,
            strategy: None,
            resumed_from: 0,
            sha256: "ab".repeat(32),
            sha256_verified: false,
        }
    }

    #[test]
    fn test_exit_outcome_success() {
        assert_eq!(determine_exit_outcome(&Ok(summary())), ProcessExit::Success);
    }

    #[test]
    fn test_exit_outcome_interrupted_on_cancel() {
        assert_eq!(
            determine_exit_outcome(&Err(DownloadError::Cancelled)),
            ProcessExit::Interrupted
        );
    }

    #[test]
    fn test_exit_outcome_failure_on_error() {
        assert_eq!(
            determine_exit_outcome(&Err(DownloadError::invalid_url("ftp://x"))),
            ProcessExit::Failure
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ProcessExit::Success.code(), 0);
        assert_eq!(ProcessExit::Failure.code(), 1);
        assert_eq!(ProcessExit::Interrupted.code(), 130);
    }
}
