//! Run statistics
//!
//! The report a node produces for one run: how many messages it sent, the
//! largest of them, every log line in emission order, how long the child ran,
//! its peak memory and the terminal status.
//!
//! `ReportAggregator` is the shared, lock-guarded accumulator. The control
//! loop, the stdout capture task and the failure path all write through it,
//! and callers read consistent snapshots through it while the run is live.
//!
//! # Example
//!
//! ```
//! use meshrun::stats::ReportAggregator;
//!
//! let aggregator = ReportAggregator::new(0, "10.0.1.10:3456");
//! aggregator.record_send(10);
//! aggregator.record_send(4096);
//! aggregator.append_log("stdout: hello");
//!
//! let report = aggregator.snapshot();
//! assert_eq!(report.send_count, 2);
//! assert_eq!(report.largest_message, 4096);
//! assert_eq!(report.messages, vec!["stdout: hello".to_string()]);
//! ```

pub mod aggregator;

use crate::runner::RunStatus;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-node run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Ordinal of the reporting node
    pub node_id: u32,
    /// Network address of the reporting node
    pub address: String,
    /// Wall-clock time the child was spawned
    pub started_at: Option<DateTime<Utc>>,
    /// Messages sent to peers
    pub send_count: u64,
    /// Largest message length sent, in bytes
    pub largest_message: u64,
    /// Log and debug lines in emission order
    pub messages: Vec<String>,
    /// Child run time in nanoseconds (set on completion)
    pub run_time_ns: u64,
    /// Peak resident memory of the child, 0 when unknown
    pub peak_memory_bytes: u64,
    pub status: RunStatus,
}

impl RunReport {
    pub fn new(node_id: u32, address: impl Into<String>) -> Self {
        Self {
            node_id,
            address: address.into(),
            started_at: None,
            send_count: 0,
            largest_message: 0,
            messages: Vec::with_capacity(100),
            run_time_ns: 0,
            peak_memory_bytes: 0,
            status: RunStatus::Initialized,
        }
    }

    pub fn run_time(&self) -> Duration {
        Duration::from_nanos(self.run_time_ns)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Lock-guarded report accumulator
///
/// Every mutator and `snapshot()` serialize on one mutex, so a reader never
/// sees a send counted without its size, or a terminal status without the
/// log line explaining it.
#[derive(Debug)]
pub struct ReportAggregator {
    inner: Mutex<RunReport>,
}

impl ReportAggregator {
    pub fn new(node_id: u32, address: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(RunReport::new(node_id, address)),
        }
    }

    /// Append one human-readable line to the log
    pub fn append_log(&self, text: impl Into<String>) {
        self.inner.lock().messages.push(text.into());
    }

    /// Count one successful send of `length` bytes
    pub fn record_send(&self, length: u64) {
        let mut report = self.inner.lock();
        report.send_count += 1;
        report.largest_message = report.largest_message.max(length);
    }

    pub fn send_count(&self) -> u64 {
        self.inner.lock().send_count
    }

    pub fn record_start(&self) {
        self.inner.lock().started_at = Some(Utc::now());
    }

    pub fn record_run_time(&self, run_time: Duration) {
        self.inner.lock().run_time_ns = run_time.as_nanos() as u64;
    }

    /// Keep the running maximum of observed child memory
    pub fn record_memory(&self, bytes: u64) {
        let mut report = self.inner.lock();
        report.peak_memory_bytes = report.peak_memory_bytes.max(bytes);
    }

    /// Consistent copy of the report as it stands
    pub fn snapshot(&self) -> RunReport {
        self.inner.lock().clone()
    }

    /// Exclusive access for multi-field transitions (status + log line)
    pub(crate) fn lock(&self) -> MutexGuard<'_, RunReport> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_report_is_initialized() {
        let report = RunReport::new(3, "10.0.0.3:3456");
        assert_eq!(report.node_id, 3);
        assert_eq!(report.status, RunStatus::Initialized);
        assert_eq!(report.send_count, 0);
        assert!(report.messages.is_empty());
        assert!(!report.is_terminal());
    }

    #[test]
    fn test_record_send_tracks_max() {
        let aggregator = ReportAggregator::new(0, "a");
        aggregator.record_send(100);
        aggregator.record_send(10);
        aggregator.record_send(50);

        let report = aggregator.snapshot();
        assert_eq!(report.send_count, 3);
        assert_eq!(report.largest_message, 100);
    }

    #[test]
    fn test_logs_keep_emission_order() {
        let aggregator = ReportAggregator::new(0, "a");
        for i in 0..5 {
            aggregator.append_log(format!("line {}", i));
        }
        let report = aggregator.snapshot();
        assert_eq!(report.messages, vec!["line 0", "line 1", "line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_record_memory_is_running_max() {
        let aggregator = ReportAggregator::new(0, "a");
        aggregator.record_memory(4096);
        aggregator.record_memory(1024);
        assert_eq!(aggregator.snapshot().peak_memory_bytes, 4096);
    }

    #[test]
    fn test_concurrent_sends_are_all_counted() {
        let aggregator = Arc::new(ReportAggregator::new(0, "a"));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let aggregator = aggregator.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        aggregator.record_send(t * 1000 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let report = aggregator.snapshot();
        assert_eq!(report.send_count, 1000);
        assert_eq!(report.largest_message, 3249);
    }

    #[test]
    fn test_report_json_round_trip() {
        let aggregator = ReportAggregator::new(1, "127.0.0.1:4000");
        aggregator.record_send(42);
        aggregator.append_log("debug text");
        let report = aggregator.snapshot();

        let json = serde_json::to_string(&report).unwrap();
        let parsed: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }
}
