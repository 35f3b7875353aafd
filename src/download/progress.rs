//! Transfer progress aggregation, rendering and checkpoint throttling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::constants::{CHECKPOINT_INTERVAL, RENDER_INTERVAL};

/// Point-in-time view of a transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Bytes accounted so far, including any resumed prefix.
    pub downloaded: u64,
    /// Resource length when known.
    pub total: Option<u64>,
    /// Completion percentage when the total is known.
    pub percent: Option<f64>,
    /// Throughput of this session in bytes per second.
    pub speed_bytes_per_sec: f64,
    /// Estimated time remaining; `None` while speed is zero or total unknown.
    pub eta: Option<Duration>,
}

/// Aggregates byte deliveries from all fetchers of one transfer.
///
/// `downloaded` never exceeds the known total: overlapping deliveries from
/// retried ranges are clamped.
#[derive(Debug)]
pub struct ProgressTracker {
    downloaded: AtomicU64,
    baseline: AtomicU64,
    total: Option<u64>,
    started: Instant,
    last_render: Mutex<Instant>,
    last_checkpoint: Mutex<Instant>,
    render_interval: Duration,
    checkpoint_interval: Duration,
    bar: ProgressBar,
}

impl ProgressTracker {
    /// Creates a tracker starting at `resume_offset`.
    ///
    /// When `show` is false nothing is drawn.
    #[must_use]
    pub fn new(total: Option<u64>, resume_offset: u64, show: bool) -> Self {
        let target = if show {
            ProgressDrawTarget::stderr_with_hz(10)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(total, target);
        let template = if total.is_some() {
            "{bytes}/{total_bytes} [{wide_bar}] {percent}% {bytes_per_sec} ETA {eta}"
        } else {
            "{spinner} {bytes} {bytes_per_sec}"
        };
        bar.set_style(
            ProgressStyle::with_template(template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        bar.set_position(resume_offset);

        let now = Instant::now();
        Self {
            downloaded: AtomicU64::new(clamp(resume_offset, total)),
            baseline: AtomicU64::new(resume_offset),
            total,
            started: now,
            last_render: Mutex::new(now),
            last_checkpoint: Mutex::new(now),
            render_interval: RENDER_INTERVAL,
            checkpoint_interval: CHECKPOINT_INTERVAL,
            bar,
        }
    }

    /// Overrides the render and checkpoint throttles.
    #[must_use]
    pub fn with_intervals(mut self, render: Duration, checkpoint: Duration) -> Self {
        self.render_interval = render;
        self.checkpoint_interval = checkpoint;
        self
    }

    /// Adds `bytes` delivered bytes and returns the new, clamped count.
    pub fn add(&self, bytes: u64) -> u64 {
        let total = self.total;
        let previous = self
            .downloaded
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(clamp(current.saturating_add(bytes), total))
            })
            .unwrap_or_else(|current| current);
        let updated = clamp(previous.saturating_add(bytes), total);
        self.maybe_render(updated);
        updated
    }

    /// Takes back bytes whose range is about to be fetched again.
    pub fn rewind(&self, bytes: u64) {
        let _ = self
            .downloaded
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    /// Restarts accounting at `offset` (used when a transfer restarts from 0).
    pub fn reset(&self, offset: u64) {
        self.downloaded.store(clamp(offset, self.total), Ordering::Release);
        self.baseline.store(offset, Ordering::Release);
        self.bar.set_position(offset);
    }

    /// Bytes accounted so far.
    #[must_use]
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    /// Resource length when known.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Time since the tracker was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Computes speed, percentage and ETA.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let downloaded = self.downloaded();
        let session_bytes = downloaded.saturating_sub(self.baseline.load(Ordering::Acquire));
        let elapsed = self.started.elapsed().as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let speed = if elapsed > 0.0 {
            session_bytes as f64 / elapsed
        } else {
            0.0
        };
        #[allow(clippy::cast_precision_loss)]
        let percent = self
            .total
            .map(|total| if total == 0 { 100.0 } else { downloaded as f64 * 100.0 / total as f64 });
        #[allow(clippy::cast_precision_loss)]
        let eta = match self.total {
            Some(total) if speed > 0.0 => Some(Duration::from_secs_f64(
                total.saturating_sub(downloaded) as f64 / speed,
            )),
            _ => None,
        };
        ProgressSnapshot {
            downloaded,
            total: self.total,
            percent,
            speed_bytes_per_sec: speed,
            eta,
        }
    }

    /// Returns true at most once per checkpoint interval.
    pub fn checkpoint_due(&self) -> bool {
        let mut last = self
            .last_checkpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if last.elapsed() >= self.checkpoint_interval {
            *last = Instant::now();
            true
        } else {
            false
        }
    }

    fn maybe_render(&self, position: u64) {
        let mut last = self
            .last_render
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if last.elapsed() >= self.render_interval {
            *last = Instant::now();
            self.bar.set_position(position);
        }
    }

    /// Draws the final position and removes the bar.
    pub fn finish(&self) {
        self.bar.set_position(self.downloaded());
        self.bar.finish_and_clear();
    }
}

fn clamp(value: u64, total: Option<u64>) -> u64 {
    total.map_or(value, |total| value.min(total))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_add_accumulates() {
        let tracker = ProgressTracker::new(Some(100), 0, false);
        assert_eq!(tracker.add(10), 10);
        assert_eq!(tracker.add(15), 25);
        assert_eq!(tracker.downloaded(), 25);
    }

    #[test]
    fn test_add_clamps_to_total() {
        let tracker = ProgressTracker::new(Some(100), 90, false);
        assert_eq!(tracker.add(50), 100);
        assert_eq!(tracker.add(1), 100);
    }

    #[test]
    fn test_add_unknown_total_is_unbounded() {
        let tracker = ProgressTracker::new(None, 0, false);
        tracker.add(u64::from(u32::MAX));
        assert_eq!(tracker.downloaded(), u64::from(u32::MAX));
        assert_eq!(tracker.snapshot().percent, None);
        assert_eq!(tracker.snapshot().eta, None);
    }

    #[test]
    fn test_concurrent_overlapping_adds_never_exceed_total() {
        let tracker = Arc::new(ProgressTracker::new(Some(10_000), 0, false));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        tracker.add(3);
                        assert!(tracker.downloaded() <= 10_000);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.downloaded(), 10_000);
    }

    #[test]
    fn test_rewind_and_reset() {
        let tracker = ProgressTracker::new(Some(100), 0, false);
        tracker.add(60);
        tracker.rewind(20);
        assert_eq!(tracker.downloaded(), 40);
        tracker.rewind(500);
        assert_eq!(tracker.downloaded(), 0);
        tracker.add(30);
        tracker.reset(0);
        assert_eq!(tracker.downloaded(), 0);
    }

    #[test]
    fn test_snapshot_zero_speed_has_no_eta() {
        let tracker = ProgressTracker::new(Some(100), 40, false);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.downloaded, 40);
        assert_eq!(snapshot.speed_bytes_per_sec, 0.0);
        assert_eq!(snapshot.eta, None);
        assert!((snapshot.percent.unwrap() - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_speed_counts_session_bytes_only() {
        let tracker = ProgressTracker::new(Some(1_000_000), 500_000, false);
        std::thread::sleep(Duration::from_millis(20));
        tracker.add(1000);
        let snapshot = tracker.snapshot();
        assert!(snapshot.speed_bytes_per_sec > 0.0);
        assert!(
            snapshot.speed_bytes_per_sec < 1000.0 / 0.019,
            "resumed bytes must not inflate speed"
        );
        assert!(snapshot.eta.is_some());
    }

    #[test]
    fn test_checkpoint_due_throttles() {
        let tracker =
            ProgressTracker::new(Some(100), 0, false).with_intervals(Duration::ZERO, Duration::from_secs(3600));
        assert!(!tracker.checkpoint_due());

        let tracker =
            ProgressTracker::new(Some(100), 0, false).with_intervals(Duration::ZERO, Duration::ZERO);
        assert!(tracker.checkpoint_due());
        assert!(tracker.checkpoint_due());
    }

    #[test]
    fn test_finish_hidden_bar_is_noop() {
        let tracker = ProgressTracker::new(Some(10), 0, false);
        tracker.add(10);
        tracker.finish();
        assert_eq!(tracker.downloaded(), 10);
    }
}
