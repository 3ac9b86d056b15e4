//! TOML configuration file parsing
//!
//! ```toml
//! nodes = 3
//! timeout_secs = 10
//! max_messages_per_node = 1000
//! max_message_bytes = 1048576
//! ```

use super::cli_convert::apply_cli_limits;
use super::RunConfig;
use crate::config::cli::Cli;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<RunConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<RunConfig> {
    let config: RunConfig = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Build the run config: TOML file (if any), then CLI overrides
///
/// `default_nodes` is used when neither the file nor the CLI names a node
/// count (node mode passes the peer list length).
pub fn merge_cli_with_config(cli: &Cli, default_nodes: usize) -> Result<RunConfig> {
    let base = match cli.config {
        Some(ref path) => parse_toml_file(path)?,
        None => RunConfig::new(default_nodes),
    };
    apply_cli_limits(cli, base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_config() {
        let config = parse_toml_string(
            r#"
            nodes = 3
            timeout_secs = 10
            max_messages_per_node = 5
            max_message_bytes = 1048576
            "#,
        )
        .unwrap();
        assert_eq!(config.nodes, 3);
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.max_messages_per_node, 5);
        assert_eq!(config.max_message_bytes, 1024 * 1024);
    }

    #[test]
    fn test_parse_applies_defaults() {
        let config = parse_toml_string("nodes = 2").unwrap();
        assert_eq!(config, RunConfig::new(2));
    }

    #[test]
    fn test_parse_requires_nodes() {
        assert!(parse_toml_string("timeout_secs = 5").is_err());
    }

    #[test]
    fn test_merge_cli_wins_over_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, "nodes = 4\ntimeout_secs = 60\nmax_messages_per_node = 9\n").unwrap();

        let cli = Cli::try_parse_from([
            "meshrun",
            "--host-list",
            "a,b,c,d",
            "--config",
            path.to_str().unwrap(),
            "--timeout",
            "5s",
        ])
        .unwrap();

        let config = merge_cli_with_config(&cli, 4).unwrap();
        assert_eq!(config.nodes, 4);
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.max_messages_per_node, 9);
    }

    #[test]
    fn test_merge_without_file_uses_default_nodes() {
        let cli = Cli::try_parse_from(["meshrun", "--host-list", "a,b"]).unwrap();
        let config = merge_cli_with_config(&cli, 2).unwrap();
        assert_eq!(config, RunConfig::new(2));
    }
}
