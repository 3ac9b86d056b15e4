//! Human-readable text output

use crate::stats::aggregator::ClusterSummary;
use crate::stats::RunReport;
use crate::util::time::{format_duration, format_size};
use std::fmt::Write;

/// Render one node's report: a header line, then its log indented
///
/// ```text
/// Node 10.0.1.10:3456 (msgs: 1, largest: 10 B, time: 12.31ms, memory: 1.20 MB):
///   stdout: hello
/// ```
pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Node {} (msgs: {}, largest: {}, time: {}, memory: {}):",
        report.address,
        report.send_count,
        format_size(report.largest_message),
        format_duration(report.run_time()),
        format_size(report.peak_memory_bytes),
    );
    for line in &report.messages {
        let _ = writeln!(out, "  {}", line);
    }
    if report.messages.is_empty() {
        let _ = writeln!(out, "  (no output)");
    }
    let _ = writeln!(out, "  status: {}", report.status);
    out
}

/// Render the summary over all nodes of a run
pub fn render_cluster_summary(summary: &ClusterSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "═══════════════════════════════════════════════════════════");
    let _ = writeln!(out, "                    RUN SUMMARY");
    let _ = writeln!(out, "═══════════════════════════════════════════════════════════");
    let _ = writeln!(out, "Nodes:           {}", summary.node_count);
    let _ = writeln!(out, "Messages sent:   {}", summary.total_sends);
    let _ = writeln!(out, "Largest message: {}", format_size(summary.largest_message));
    let _ = writeln!(out, "Slowest node:    {}", format_duration(summary.max_run_time));
    let _ = writeln!(out, "Peak memory:     {}", format_size(summary.max_peak_memory));

    if let Some(ref lines) = summary.single_node_output {
        let _ = writeln!(out);
        let _ = writeln!(out, "Only one node produced output:");
        for line in lines {
            let _ = writeln!(out, "  {}", line);
        }
    }

    let _ = writeln!(out);
    if summary.succeeded() {
        let _ = writeln!(out, "Run succeeded ({})", summary.status);
    } else {
        let _ = writeln!(out, "Run failed ({})", summary.status);
    }
    out
}

pub fn print_report(report: &RunReport) {
    print!("{}", render_report(report));
}

pub fn print_cluster_summary(summary: &ClusterSummary) {
    println!();
    print!("{}", render_cluster_summary(summary));
}
