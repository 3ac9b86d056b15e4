//! Node identity discovery
//!
//! A node learns two things before a run: its own ordinal among the peers and
//! the ordered list of peer addresses (itself included). Both come from the
//! node's environment: explicit flags (`--node-id` falls back to the
//! `MESHRUN_NODE_ID` variable), a `nodeid` file dropped by deployment, and a
//! clients file with one address per line.

use crate::config::{normalize_peer, peer_port};
use crate::distributed::protocol::DEFAULT_AGENT_PORT;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// File deployment writes the node ordinal into
pub const NODE_ID_FILE: &str = "nodeid";

/// This node's place in the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    node_id: u32,
    peers: Vec<String>,
}

impl NodeIdentity {
    /// Build an identity, normalizing peer addresses
    pub fn new(node_id: u32, peers: Vec<String>) -> Result<Self> {
        if peers.is_empty() {
            anyhow::bail!("peer list is empty");
        }
        if node_id as usize >= peers.len() {
            anyhow::bail!(
                "node id {} out of range for {} peers",
                node_id,
                peers.len()
            );
        }
        let peers = peers.iter().map(|p| normalize_peer(p)).collect();
        Ok(Self { node_id, peers })
    }

    /// Discover the identity from flags, environment and files
    pub fn discover(source: &IdentitySource) -> Result<Self> {
        let node_id = resolve_node_id(source.node_id, &source.node_id_file)?;
        let peers = resolve_peers(source.host_list.as_deref(), source.clients_file.as_deref())?;
        Self::new(node_id, peers)
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub fn node_count(&self) -> usize {
        self.peers.len()
    }

    /// This node's own address as peers see it
    pub fn address(&self) -> &str {
        &self.peers[self.node_id as usize]
    }

    /// Wildcard address the peer listener binds
    pub fn listen_addr(&self) -> String {
        let port = peer_port(self.address()).unwrap_or(DEFAULT_AGENT_PORT);
        format!("0.0.0.0:{}", port)
    }
}

/// Where to look for the identity
#[derive(Debug, Clone, Default)]
pub struct IdentitySource {
    pub node_id: Option<u32>,
    pub node_id_file: PathBuf,
    pub host_list: Option<String>,
    pub clients_file: Option<PathBuf>,
}

/// Explicit id (flag or `MESHRUN_NODE_ID`), then the node id file
pub fn resolve_node_id(explicit: Option<u32>, file: &Path) -> Result<u32> {
    if let Some(id) = explicit {
        return Ok(id);
    }
    let contents = fs::read_to_string(file)
        .with_context(|| format!("Failed to read node id file: {}", file.display()))?;
    contents
        .trim()
        .parse()
        .with_context(|| format!("Invalid node id in {}: {:?}", file.display(), contents.trim()))
}

/// Comma-separated host list wins over the clients file
pub fn resolve_peers(host_list: Option<&str>, clients_file: Option<&Path>) -> Result<Vec<String>> {
    let peers = match (host_list, clients_file) {
        (Some(list), _) => parse_host_list(list),
        (None, Some(path)) => read_clients_file(path)?,
        (None, None) => anyhow::bail!("no peer list given (use --host-list or --clients-file)"),
    };
    if peers.is_empty() {
        anyhow::bail!("peer list is empty");
    }
    Ok(peers)
}

pub fn parse_host_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// One address per line; blank lines and `#` comments are skipped
pub fn read_clients_file(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read clients file: {}", path.display()))?;
    Ok(contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}
