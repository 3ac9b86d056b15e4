//! JSON output formatting
//!
//! One document per invocation: tool info, every node report as produced by
//! the agent, and the cluster summary.

use crate::runner::RunStatus;
use crate::stats::aggregator::ClusterSummary;
use crate::stats::RunReport;
use crate::util::time::format_duration;
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

/// Duration with both nanoseconds and human-readable format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDuration {
    pub nanos: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        Self {
            nanos: d.as_nanos() as u64,
            human: format_duration(d),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRunInfo {
    pub tool: String,
    pub version: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSummary {
    pub node_count: usize,
    pub status: RunStatus,
    pub total_sends: u64,
    pub largest_message: u64,
    pub max_run_time: JsonDuration,
    pub max_peak_memory: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_node_output: Option<Vec<String>>,
}

impl From<&ClusterSummary> for JsonSummary {
    fn from(summary: &ClusterSummary) -> Self {
        Self {
            node_count: summary.node_count,
            status: summary.status,
            total_sends: summary.total_sends,
            largest_message: summary.largest_message,
            max_run_time: JsonDuration::from_duration(summary.max_run_time),
            max_peak_memory: summary.max_peak_memory,
            single_node_output: summary.single_node_output.clone(),
        }
    }
}

/// Complete JSON document for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRunOutput {
    pub info: JsonRunInfo,
    pub nodes: Vec<RunReport>,
    pub summary: JsonSummary,
}

pub fn build_run_output(reports: &[RunReport]) -> JsonRunOutput {
    let summary = ClusterSummary::from_reports(reports);
    JsonRunOutput {
        info: JsonRunInfo {
            tool: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: Utc::now(),
        },
        nodes: reports.to_vec(),
        summary: JsonSummary::from(&summary),
    }
}

/// Write the document to `output_path`
pub fn write_json_output(output_path: &Path, output: &JsonRunOutput, pretty: bool) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    let writer = BufWriter::new(file);

    if pretty {
        serde_json::to_writer_pretty(writer, output)?;
    } else {
        serde_json::to_writer(writer, output)?;
    }

    Ok(())
}
