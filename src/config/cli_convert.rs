//! CLI to Config conversion utilities

use crate::config::cli::Cli;
use crate::config::RunConfig;
use anyhow::{Context, Result};

/// Parse a size string (e.g., "1G", "100M", "4k") to bytes
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if s.ends_with("k") || s.ends_with("kb") {
        (s.trim_end_matches("kb").trim_end_matches("k"), 1024u64)
    } else if s.ends_with("m") || s.ends_with("mb") {
        (s.trim_end_matches("mb").trim_end_matches("m"), 1024 * 1024)
    } else if s.ends_with("g") || s.ends_with("gb") {
        (s.trim_end_matches("gb").trim_end_matches("g"), 1024 * 1024 * 1024)
    } else if s.ends_with("b") {
        (s.trim_end_matches("b"), 1)
    } else {
        (s.as_str(), 1)
    };

    let num: u64 = num_str.trim().parse()
        .with_context(|| format!("Invalid size format: {}", s))?;

    num.checked_mul(multiplier)
        .with_context(|| format!("Size out of range: {}", s))
}

/// Parse a duration string (e.g., "60s", "5m", "1h") to seconds
pub fn parse_duration(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if s.ends_with("sec") || s.ends_with("s") {
        (s.trim_end_matches("sec").trim_end_matches("s"), 1u64)
    } else if s.ends_with("min") || s.ends_with("m") {
        (s.trim_end_matches("min").trim_end_matches("m"), 60)
    } else if s.ends_with("hr") || s.ends_with("h") {
        (s.trim_end_matches("hr").trim_end_matches("h"), 3600)
    } else {
        (s.as_str(), 1)
    };

    let num: u64 = num_str.trim().parse()
        .with_context(|| format!("Invalid duration format: {}", s))?;

    num.checked_mul(multiplier)
        .with_context(|| format!("Duration out of range: {}", s))
}

/// Apply CLI run-limit flags on top of `config` (CLI takes precedence)
pub fn apply_cli_limits(cli: &Cli, mut config: RunConfig) -> Result<RunConfig> {
    if let Some(nodes) = cli.nodes {
        config.nodes = nodes;
    }
    if let Some(ref timeout) = cli.timeout {
        config.timeout_secs = parse_duration(timeout).context("Invalid timeout")?;
    }
    if let Some(max_messages) = cli.max_messages {
        config.max_messages_per_node = max_messages;
    }
    if let Some(ref size) = cli.max_message_size {
        config.max_message_bytes = parse_size(size).context("Invalid max message size")?;
    }
    Ok(config)
}
