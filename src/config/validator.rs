//! Configuration validation

use super::{NodeIdentity, RunConfig};
use anyhow::Result;

/// Validate limits and their fit with this node's identity
pub fn validate_run(config: &RunConfig, identity: &NodeIdentity) -> Result<()> {
    validate_config(config)?;

    if identity.node_count() != config.nodes {
        anyhow::bail!(
            "peer list has {} addresses but the run is configured for {} nodes",
            identity.node_count(),
            config.nodes
        );
    }

    Ok(())
}

/// Validate run limits on their own
pub fn validate_config(config: &RunConfig) -> Result<()> {
    config.validate().map_err(|e| anyhow::anyhow!(e))
}
