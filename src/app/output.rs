//! Human-readable completion report.

use indicatif::{HumanBytes, HumanDuration};
use isofetch_core::DownloadSummary;

/// Lines printed to stdout after a successful download.
pub(crate) fn format_summary(summary: &DownloadSummary) -> Vec<String> {
    let mut lines = vec![
        format!("Saved: {}", summary.path.display()),
        format!(
            "Size: {} ({} bytes)",
            HumanBytes(summary.size),
            summary.size
        ),
        format!(
            "Time: {} at {}/s",
            HumanDuration(summary.duration),
            HumanBytes(speed_as_bytes(summary.avg_speed_bytes_per_sec))
        ),
    ];

    let mode = summary
        .strategy
        .map_or_else(|| "already complete".to_string(), |s| s.to_string());
    lines.push(format!("Transfer: {} via {}", mode, summary.protocol));

    if summary.resumed_from > 0 {
        lines.push(format!(
            "Resumed from: {}",
            HumanBytes(summary.resumed_from)
        ));
    }
    if summary.sha256_verified {
        lines.push(format!("SHA-256: {} (verified)", summary.sha256));
    } else {
        lines.push(format!("SHA-256: {}", summary.sha256));
    }
    lines
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn speed_as_bytes(speed: f64) -> u64 {
    if speed.is_finite() && speed > 0.0 {
        speed.round() as u64
    } else {
        0
    }
}
