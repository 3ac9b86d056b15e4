//! Child memory tracking
//!
//! Samples the resident memory of the child program while it runs. Reads
//! `/proc/<pid>/status` on Linux; elsewhere nothing is sampled and the report
//! keeps a peak of 0.

use crate::stats::ReportAggregator;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

/// How often the child's memory is sampled
pub const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

/// Memory usage of one process at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    /// Resident Set Size (VmRSS) in bytes
    pub rss_bytes: u64,
    /// Kernel-tracked peak RSS (VmHWM) in bytes, 0 if not reported
    pub hwm_bytes: u64,
}

impl MemorySnapshot {
    /// Take a snapshot of process `pid`
    ///
    /// Returns None once the process is gone or on non-Linux systems.
    pub fn take(pid: u32) -> Option<Self> {
        let status = fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
        Self::parse_status(&status)
    }

    /// Parse the `VmRSS:` and `VmHWM:` lines of a proc status file
    pub fn parse_status(status: &str) -> Option<Self> {
        let mut rss_kb = None;
        let mut hwm_kb = None;

        for line in status.lines() {
            if line.starts_with("VmRSS:") {
                // VmRSS:     12345 kB
                rss_kb = line.split_whitespace().nth(1).and_then(|v| v.parse::<u64>().ok());
            } else if line.starts_with("VmHWM:") {
                hwm_kb = line.split_whitespace().nth(1).and_then(|v| v.parse::<u64>().ok());
            }

            if rss_kb.is_some() && hwm_kb.is_some() {
                break;
            }
        }

        Some(Self {
            rss_bytes: rss_kb? * 1024,
            hwm_bytes: hwm_kb.unwrap_or(0) * 1024,
        })
    }

    /// Best estimate of peak memory so far
    pub fn peak_bytes(&self) -> u64 {
        self.rss_bytes.max(self.hwm_bytes)
    }
}

/// Sample `pid` until it disappears, folding the peak into the report
///
/// Runs as its own task and is aborted when the run ends.
pub async fn sample_child_memory(pid: u32, report: Arc<ReportAggregator>) {
    while let Some(snapshot) = MemorySnapshot::take(pid) {
        report.record_memory(snapshot.peak_bytes());
        tokio::time::sleep(MEMORY_SAMPLE_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tsleep\nVmPeak:\t   8000 kB\nVmSize:\t   7000 kB\nVmHWM:\t    900 kB\nVmRSS:\t    800 kB\n";

    #[test]
    fn test_parse_status() {
        let snapshot = MemorySnapshot::parse_status(STATUS).unwrap();
        assert_eq!(snapshot.rss_bytes, 800 * 1024);
        assert_eq!(snapshot.hwm_bytes, 900 * 1024);
        assert_eq!(snapshot.peak_bytes(), 900 * 1024);
    }

    #[test]
    fn test_parse_status_without_rss() {
        // Kernel threads and zombies carry no VmRSS line
        assert!(MemorySnapshot::parse_status("Name:\tkthreadd\nState:\tS\n").is_none());
    }

    #[test]
    fn test_parse_status_without_hwm() {
        let snapshot = MemorySnapshot::parse_status("VmRSS:\t 100 kB\n").unwrap();
        assert_eq!(snapshot.hwm_bytes, 0);
        assert_eq!(snapshot.peak_bytes(), 100 * 1024);
    }

    #[test]
    fn test_snapshot_self() {
        // This test only works on Linux
        if let Some(snapshot) = MemorySnapshot::take(std::process::id()) {
            assert!(snapshot.rss_bytes > 0);
            assert!(snapshot.peak_bytes() >= snapshot.rss_bytes);
        }
    }

    #[tokio::test]
    async fn test_sampler_stops_for_missing_process() {
        let report = Arc::new(ReportAggregator::new(0, "a"));
        // PIDs are capped well below u32::MAX, so this one never exists
        sample_child_memory(u32::MAX, report.clone()).await;
        assert_eq!(report.snapshot().peak_memory_bytes, 0);
    }
}
