//! Throttled progress reporting

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::source::SizeEstimate;

/// Rows between reports when the source size is unknown
pub const DEFAULT_REPORT_INTERVAL: u64 = 100;
const MAX_REPORT_INTERVAL: u64 = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CopyProgress {
    pub rows_processed: u64,
    pub estimated_total: Option<u64>,
}

impl CopyProgress {
    /// Percentage done, when the total is known
    pub fn percent(&self) -> Option<f64> {
        self.estimated_total
            .filter(|total| *total > 0)
            .map(|total| (self.rows_processed as f64 / total as f64 * 100.0).min(100.0))
    }
}

/// Called with each published progress value, off the copy worker.
pub type CopyProgressCallback = Arc<dyn Fn(CopyProgress) + Send + Sync>;

/// Rows between progress reports.
///
/// A configured interval wins. Otherwise about one report per percent of
/// the estimated size, bounded to `1..=10_000`.
pub fn report_interval(configured: Option<u64>, estimate: SizeEstimate) -> u64 {
    if let Some(interval) = configured.filter(|n| *n > 0) {
        return interval;
    }
    match estimate.estimated_rows() {
        Some(rows) => (rows / 100).clamp(1, MAX_REPORT_INTERVAL),
        None => DEFAULT_REPORT_INTERVAL,
    }
}

/// Publishes row counts on a watch channel every `interval` rows.
pub(crate) struct ProgressReporter {
    sender: watch::Sender<CopyProgress>,
    interval: u64,
    next_report: u64,
    estimated_total: Option<u64>,
}

impl ProgressReporter {
    pub(crate) fn new(sender: watch::Sender<CopyProgress>, interval: u64, estimate: SizeEstimate) -> Self {
        let estimated_total = estimate.estimated_rows();
        sender.send_replace(CopyProgress {
            rows_processed: 0,
            estimated_total,
        });
        Self {
            sender,
            interval: interval.max(1),
            next_report: interval.max(1),
            estimated_total,
        }
    }

    pub(crate) fn interval(&self) -> u64 {
        self.interval
    }

    pub(crate) fn rows_processed(&mut self, rows: u64) {
        if rows >= self.next_report {
            self.publish(rows);
            self.next_report = rows + self.interval;
        }
    }

    /// Final count, always published
    pub(crate) fn finish(&self, rows: u64) {
        self.publish(rows);
    }

    fn publish(&self, rows: u64) {
        self.sender.send_replace(CopyProgress {
            rows_processed: rows,
            estimated_total: self.estimated_total.map(|total| total.max(rows)),
        });
    }
}

/// Drive `callback` from `receiver` until the sender goes away.
pub(crate) fn spawn_callback(
    mut receiver: watch::Receiver<CopyProgress>,
    callback: CopyProgressCallback,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while receiver.changed().await.is_ok() {
            let progress = *receiver.borrow_and_update();
            callback(progress);
        }
    })
}
