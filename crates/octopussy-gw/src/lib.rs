// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Octopussy gateway daemon
//!
//! Runs a dispatcher with the gateway servers and client attached, so that
//! work processes in other programs (or on other hosts) can reach each other
//! through it.
//!
//! # Quick Start
//!
//! ```bash
//! # Listen on the default TCP port and Unix socket
//! octopussy-gw
//!
//! # Connect to another node as well
//! octopussy-gw --peer hostb:4808
//!
//! # Using a config file
//! octopussy-gw --config gw.toml
//! ```

pub mod config;
pub mod monitor;

pub use config::{ConfigError, NodeConfig};
pub use monitor::{MonitorStats, MonitorWp, ShutdownWp};

use std::sync::Arc;

use octopussy::{AidRegistry, Context, Dispatcher, MsgAddress};
use thiserror::Error;

/// Daemon errors.
#[derive(Debug, Error)]
pub enum GwError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dispatcher error: {0}")]
    Dispatcher(#[from] octopussy::Error),
}

/// Names registered on top of the standard registry.
const DAEMON_AIDS: &[&str] = &["ShutdownWP"];

/// Build the dispatcher for `config` with monitor, shutdown handler and
/// gateways attached. Returns the dispatcher and the gateway addresses.
pub fn build_node(config: &NodeConfig) -> Result<(Dispatcher, Vec<MsgAddress>), GwError> {
    let gateway = config.to_gateway_config()?;
    let registry = AidRegistry::standard().with_names(DAEMON_AIDS.iter().copied())?;
    let shutdown_class = registry
        .lookup("ShutdownWP")
        .ok_or_else(|| octopussy::Error::UnknownAtomicId("ShutdownWP".into()))?;
    let mut ctx = Context::local(Arc::new(registry));
    if let Some(host) = &config.advertise_host {
        ctx = ctx.with_hostname(host.clone());
    }
    tracing::info!(
        node = %config.name,
        process = %ctx.process(),
        host = %ctx.host(),
        hostname = ctx.hostname(),
        "node identity"
    );

    let mut dsp = Dispatcher::new(ctx)?;
    dsp.attach(Box::new(MonitorWp::new(config.name.clone())));
    dsp.attach(Box::new(ShutdownWp::new(shutdown_class)));
    let gateways = octopussy::gateway::init_gateways_with(&mut dsp, &gateway)?;
    Ok((dsp, gateways))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_node_attaches_everything() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            listen_tcp: false,
            socket_path: dir.path().join("node.sock"),
            ..Default::default()
        };
        let (dsp, gateways) = build_node(&config).unwrap();
        // Unix server and client.
        assert_eq!(gateways.len(), 2);
        // Plus monitor and shutdown handler.
        assert_eq!(dsp.addresses().len(), 4);
    }

    #[test]
    fn test_bad_peer_is_a_config_error() {
        let config = NodeConfig {
            peers: vec!["nowhere".into()],
            ..Default::default()
        };
        assert!(matches!(build_node(&config), Err(GwError::Config(_))));
    }
}
