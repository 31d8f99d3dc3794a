//! Percent progress of long-running scans
//!
//! A report is emitted when the whole percentage changes and the report
//! interval has passed since the previous one. Reaching 100% always reports.

use std::fmt;
use std::time::{Duration, Instant};

/// Minimum time between two reports
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(15);

/// Snapshot handed to a progress hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    pub current: u64,
    pub total: u64,
    pub percent: u8,
}

type Hook = Box<dyn FnMut(&ProgressReport) + Send>;

/// Progress counter with rate-limited reporting
pub struct Progress {
    label: String,
    total: u64,
    current: u64,
    /// Last reported percentage
    percent: u8,
    interval: Duration,
    last: Instant,
    hook: Option<Hook>,
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("label", &self.label)
            .field("total", &self.total)
            .field("current", &self.current)
            .field("percent", &self.percent)
            .field("interval", &self.interval)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl Progress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            total: 0,
            current: 0,
            percent: 0,
            interval: DEFAULT_REPORT_INTERVAL,
            last: Instant::now(),
            hook: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Call `hook` with every report, in addition to the log event
    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&ProgressReport) + Send + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Restart counting towards `total`
    pub fn init(&mut self, total: u64) {
        self.total = total;
        self.current = 0;
        self.percent = 0;
        self.last = Instant::now();
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    /// Percentage of the last report
    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Count `step` more units; returns whether a report was emitted
    pub fn forward(&mut self, step: u64) -> bool {
        if self.total == 0 {
            return false;
        }
        self.current = (self.current + step).min(self.total);
        let percent = (self.current * 100 / self.total) as u8;
        if percent == self.percent {
            return false;
        }
        let now = Instant::now();
        if percent < 100 && now.duration_since(self.last) < self.interval {
            return false;
        }
        self.percent = percent;
        self.last = now;
        let report = ProgressReport {
            current: self.current,
            total: self.total,
            percent,
        };
        tracing::info!(label = %self.label, percent, current = self.current, total = self.total, "progress");
        if let Some(hook) = self.hook.as_mut() {
            hook(&report);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_reports_each_percent_change() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut progress = Progress::new("scan")
            .with_interval(Duration::ZERO)
            .with_hook(move |report| sink.lock().push(report.percent));
        progress.init(8);
        let emitted: Vec<bool> = (0..9).map(|_| progress.forward(1)).collect();
        assert_eq!(
            emitted,
            vec![true, true, true, true, true, true, true, true, false]
        );
        assert_eq!(*seen.lock(), vec![12, 25, 37, 50, 62, 75, 87, 100]);
        assert_eq!(progress.current(), 8);
    }

    #[test]
    fn test_interval_limits_reports_but_not_completion() {
        let mut progress = Progress::new("slow").with_interval(Duration::from_secs(3600));
        progress.init(4);
        assert!(!progress.forward(1));
        assert!(!progress.forward(2));
        assert_eq!(progress.percent(), 0);
        assert!(progress.forward(1));
        assert_eq!(progress.percent(), 100);

        let mut empty = Progress::new("empty");
        empty.init(0);
        assert!(!empty.forward(1));
    }
}
