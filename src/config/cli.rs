//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Node mode (default) - run this node's share of a distributed run
    Node,
    /// Local mode - run every node in this process over loopback
    Local,
}

/// meshrun - run a compiled program across a fleet and relay its messages
#[derive(Parser, Debug)]
#[command(name = "meshrun")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: node or local
    #[arg(long, value_enum, default_value = "node")]
    pub mode: ExecutionMode,

    // === Program Options ===
    /// Program to run (default: the single *.app file in --work-dir)
    #[arg(long)]
    pub program: Option<PathBuf>,

    /// Directory searched for the program and the nodeid file
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    // === Identity Options ===
    /// This node's ordinal (default: the nodeid file)
    #[arg(long, env = "MESHRUN_NODE_ID")]
    pub node_id: Option<u32>,

    /// File holding this node's ordinal (relative to --work-dir)
    #[arg(long, default_value = "nodeid")]
    pub node_id_file: PathBuf,

    /// Comma-separated list of peer addresses, in ordinal order (e.g., "10.0.1.10,10.0.1.11:3456")
    #[arg(long)]
    pub host_list: Option<String>,

    /// File containing peer addresses (one per line, in ordinal order)
    #[arg(long)]
    pub clients_file: Option<PathBuf>,

    /// First port used by local mode (node i listens on port + i)
    #[arg(long, default_value = "3456")]
    pub listen_port: u16,

    // === Run Limits ===
    /// Number of participating nodes (default: size of the peer list)
    #[arg(long)]
    pub nodes: Option<usize>,

    /// Run timeout (e.g., 10s, 2m)
    #[arg(long)]
    pub timeout: Option<String>,

    /// Maximum messages a node may send
    #[arg(long)]
    pub max_messages: Option<u64>,

    /// Maximum size of one message (e.g., 1M, 64k)
    #[arg(long)]
    pub max_message_size: Option<String>,

    /// TOML file with run limits (CLI flags take precedence)
    #[arg(long)]
    pub config: Option<PathBuf>,

    // === Output Options ===
    /// Write the run report(s) as JSON to this path
    #[arg(long)]
    pub json_output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(0) = self.nodes {
            anyhow::bail!("nodes must be at least 1");
        }
        if let Some(0) = self.max_messages {
            anyhow::bail!("max_messages must be at least 1");
        }

        match self.mode {
            ExecutionMode::Node => {
                if self.host_list.is_none() && self.clients_file.is_none() {
                    anyhow::bail!("node mode requires --host-list or --clients-file");
                }
            }
            ExecutionMode::Local => {
                if self.nodes.is_none() && self.config.is_none() {
                    anyhow::bail!("local mode requires --nodes or --config");
                }
                if self.host_list.is_some() || self.clients_file.is_some() {
                    anyhow::bail!("local mode assigns loopback addresses; drop --host-list/--clients-file");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("meshrun").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_node_mode_defaults() {
        let cli = parse(&["--host-list", "10.0.1.10,10.0.1.11"]);
        assert_eq!(cli.mode, ExecutionMode::Node);
        assert_eq!(cli.node_id_file, PathBuf::from("nodeid"));
        assert_eq!(cli.listen_port, 3456);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_node_mode_needs_peers() {
        let cli = parse(&["--node-id", "0"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_local_mode() {
        let cli = parse(&["--mode", "local", "--nodes", "4", "--timeout", "30s"]);
        assert_eq!(cli.mode, ExecutionMode::Local);
        assert_eq!(cli.nodes, Some(4));
        assert!(cli.validate().is_ok());

        let cli = parse(&["--mode", "local"]);
        assert!(cli.validate().is_err());

        let cli = parse(&["--mode", "local", "--nodes", "2", "--host-list", "a,b"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_node_id_from_environment() {
        std::env::set_var("MESHRUN_NODE_ID", "2");
        let from_env = Cli::try_parse_from(["meshrun", "--host-list", "a,b,c"]);
        let from_flag = Cli::try_parse_from(["meshrun", "--host-list", "a,b,c", "--node-id", "1"]);
        std::env::remove_var("MESHRUN_NODE_ID");

        assert_eq!(from_env.unwrap().node_id, Some(2));
        assert_eq!(from_flag.unwrap().node_id, Some(1));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let cli = parse(&["--host-list", "a", "--max-messages", "0"]);
        assert!(cli.validate().is_err());
        let cli = parse(&["--host-list", "a", "--nodes", "0"]);
        assert!(cli.validate().is_err());
    }
}
