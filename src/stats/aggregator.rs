//! Cluster-wide report aggregation
//!
//! Folds the per-node reports of one distributed run into a single summary:
//! the slowest node's run time, the largest peak memory, the total number of
//! messages and the overall outcome.
//!
//! # Example
//!
//! ```
//! use meshrun::runner::RunStatus;
//! use meshrun::stats::{RunReport, aggregator::ClusterSummary};
//!
//! let mut a = RunReport::new(0, "10.0.1.10:3456");
//! a.status = RunStatus::Done;
//! a.send_count = 3;
//! let mut b = RunReport::new(1, "10.0.1.11:3456");
//! b.status = RunStatus::Done;
//! b.send_count = 1;
//!
//! let summary = ClusterSummary::from_reports(&[a, b]);
//! assert_eq!(summary.total_sends, 4);
//! assert_eq!(summary.status, RunStatus::Done);
//! ```

use crate::runner::RunStatus;
use crate::stats::RunReport;
use std::time::Duration;

/// Summary over every node of one run
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    /// Number of node reports folded in
    pub node_count: usize,
    /// Longest child run time across nodes
    pub max_run_time: Duration,
    /// Largest peak memory across nodes
    pub max_peak_memory: u64,
    /// Messages sent by all nodes together
    pub total_sends: u64,
    /// Largest single message anywhere in the run
    pub largest_message: u64,
    /// Done only when every node is Done
    pub status: RunStatus,
    /// Log lines of the only node that logged anything, if exactly one did
    pub single_node_output: Option<Vec<String>>,
}

impl ClusterSummary {
    pub fn from_reports(reports: &[RunReport]) -> Self {
        let mut max_run_time = Duration::ZERO;
        let mut max_peak_memory = 0;
        let mut total_sends = 0;
        let mut largest_message = 0;
        let mut logging_nodes = Vec::new();

        for (index, report) in reports.iter().enumerate() {
            max_run_time = max_run_time.max(report.run_time());
            max_peak_memory = max_peak_memory.max(report.peak_memory_bytes);
            total_sends += report.send_count;
            largest_message = largest_message.max(report.largest_message);
            if !report.messages.is_empty() {
                logging_nodes.push(index);
            }
        }

        let status = overall_status(reports);

        let single_node_output = match logging_nodes.as_slice() {
            [only] => Some(reports[*only].messages.clone()),
            _ => None,
        };

        Self {
            node_count: reports.len(),
            max_run_time,
            max_peak_memory,
            total_sends,
            largest_message,
            status,
            single_node_output,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Done
    }
}

/// Any Error wins, then any node still live, otherwise Done
fn overall_status(reports: &[RunReport]) -> RunStatus {
    if reports.is_empty() {
        return RunStatus::Initialized;
    }
    if reports.iter().any(|r| r.status == RunStatus::Error) {
        RunStatus::Error
    } else if reports.iter().all(|r| r.status == RunStatus::Done) {
        RunStatus::Done
    } else if reports.iter().any(|r| r.status == RunStatus::Running) {
        RunStatus::Running
    } else {
        RunStatus::Initialized
    }
}
