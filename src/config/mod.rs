//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, node identity
//! discovery and validation.

pub mod cli;
pub mod cli_convert;
pub mod identity;
pub mod toml;
pub mod validator;

use crate::distributed::protocol::DEFAULT_AGENT_PORT;
use crate::util::time::format_size;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

pub use identity::NodeIdentity;

const MB: u64 = 1024 * 1024;

/// Limits for one run, fixed at start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of participating nodes
    pub nodes: usize,
    /// Wall-clock budget for the whole run
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Messages a node may send during the run
    #[serde(default = "default_max_messages")]
    pub max_messages_per_node: u64,
    /// Largest payload a single message may carry
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_messages() -> u64 {
    1000
}

fn default_max_message_bytes() -> u64 {
    8 * MB
}

impl RunConfig {
    pub fn new(nodes: usize) -> Self {
        Self {
            nodes,
            timeout_secs: default_timeout_secs(),
            max_messages_per_node: default_max_messages(),
            max_message_bytes: default_max_message_bytes(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// All four limits must be positive
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes == 0 {
            return Err("nodes must be at least 1".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("timeout must be at least 1 second".to_string());
        }
        if self.max_messages_per_node == 0 {
            return Err("max_messages_per_node must be at least 1".to_string());
        }
        if self.max_message_bytes == 0 {
            return Err("max_message_bytes must be at least 1".to_string());
        }
        if self.max_message_bytes > u32::MAX as u64 {
            return Err(format!(
                "max_message_bytes must fit the 4-byte length field, got {}",
                self.max_message_bytes
            ));
        }
        Ok(())
    }
}

impl fmt::Display for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, timeout {}s, max {} msgs/node, max {} per msg",
            self.nodes,
            self.timeout_secs,
            self.max_messages_per_node,
            format_size(self.max_message_bytes)
        )
    }
}

/// Give a peer address the default agent port when it has none
///
/// Accepts `ip:port`, bare IPv4/IPv6, `[v6]:port`, `host` and `host:port`.
pub fn normalize_peer(addr: &str) -> String {
    let addr = addr.trim();
    if addr.parse::<SocketAddr>().is_ok() {
        return addr.to_string();
    }
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return SocketAddr::new(ip, DEFAULT_AGENT_PORT).to_string();
    }
    match addr.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => addr.to_string(),
        _ => format!("{}:{}", addr, DEFAULT_AGENT_PORT),
    }
}

/// Port part of a normalized peer address
pub fn peer_port(addr: &str) -> Option<u16> {
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        return Some(sock.port());
    }
    addr.rsplit_once(':').and_then(|(_, port)| port.parse().ok())
}
