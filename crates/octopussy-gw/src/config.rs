// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Daemon configuration file.
//!
//! ```toml
//! name = "node-a"
//! tcp_port = 4808
//! socket_path = "/run/octopussy.sock"
//! peers = ["hostb:4808", "unix:/tmp/other.sock"]
//! log_level = "info"
//!
//! [timing]
//! heartbeat_secs = 5
//! reconnect_secs = 2
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use octopussy::gateway::{Endpoint, GatewayConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Node configuration as read from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name (for logs).
    #[serde(default = "default_name")]
    pub name: String,

    /// Host name announced to peers (default: system host name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_host: Option<String>,

    /// TCP listen port (0 = default port).
    #[serde(default)]
    pub tcp_port: u16,

    /// Unix socket path (empty = per-user default).
    #[serde(default)]
    pub socket_path: PathBuf,

    #[serde(default = "default_true")]
    pub listen_tcp: bool,

    #[serde(default = "default_true")]
    pub listen_unix: bool,

    /// Peers to connect to: `host:port` or `unix:<path>`.
    #[serde(default)]
    pub peers: Vec<String>,

    /// Follow `GW.Server.Open` announcements from other nodes.
    #[serde(default = "default_true")]
    pub follow_announcements: bool,

    /// Verify packet checksums (default: build feature).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_checksum: Option<bool>,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub timing: TimingConfig,
}

/// Timing overrides, in seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rebind_secs: Option<u64>,
    /// Attempts for announced peers (0 = unlimited).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,
}

fn default_name() -> String {
    "octopussy-gw".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            advertise_host: None,
            tcp_port: 0,
            socket_path: PathBuf::new(),
            listen_tcp: true,
            listen_unix: true,
            peers: Vec::new(),
            follow_announcements: true,
            verify_checksum: None,
            log_level: default_log_level(),
            timing: TimingConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Example configuration, as written by `gen-config`.
    pub fn example() -> Self {
        Self {
            name: "node-a".to_string(),
            peers: vec!["localhost:4809".to_string()],
            timing: TimingConfig {
                heartbeat_secs: Some(5),
                reconnect_secs: Some(2),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.listen_tcp && !self.listen_unix && self.peers.is_empty() {
            return Err(ConfigError::Invalid(
                "No listeners and no peers: the node could never connect".into(),
            ));
        }
        for peer in &self.peers {
            peer.parse::<Endpoint>()
                .map_err(|e| ConfigError::Invalid(format!("peer '{}': {}", peer, e)))?;
        }
        let timings = [
            ("init_timeout_secs", self.timing.init_timeout_secs),
            ("write_timeout_secs", self.timing.write_timeout_secs),
            ("heartbeat_secs", self.timing.heartbeat_secs),
            ("reconnect_secs", self.timing.reconnect_secs),
            ("rebind_secs", self.timing.rebind_secs),
        ];
        for (name, value) in timings {
            if value == Some(0) {
                return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }

    /// Gateway settings for the core library.
    pub fn to_gateway_config(&self) -> Result<GatewayConfig, ConfigError> {
        let peers = self
            .peers
            .iter()
            .map(|p| {
                p.parse::<Endpoint>()
                    .map_err(|e| ConfigError::Invalid(format!("peer '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut gw = GatewayConfig::default()
            .with_tcp_port(self.tcp_port)
            .with_socket_path(self.socket_path.clone())
            .with_listeners(self.listen_tcp, self.listen_unix)
            .with_peers(peers)
            .with_follow_announcements(self.follow_announcements);
        if let Some(verify) = self.verify_checksum {
            gw = gw.with_verify_checksum(verify);
        }
        let t = &self.timing;
        if let Some(s) = t.init_timeout_secs {
            gw = gw.with_init_timeout(Duration::from_secs(s));
        }
        if let Some(s) = t.write_timeout_secs {
            gw = gw.with_write_timeout(Duration::from_secs(s));
        }
        if let Some(s) = t.heartbeat_secs {
            gw = gw.with_heartbeat_interval(Duration::from_secs(s));
        }
        if let Some(s) = t.reconnect_secs {
            gw = gw.with_reconnect_interval(Duration::from_secs(s));
        }
        if let Some(s) = t.rebind_secs {
            gw = gw.with_rebind_interval(Duration::from_secs(s));
        }
        if let Some(n) = t.max_reconnect_attempts {
            gw = gw.with_max_reconnect_attempts(n);
        }
        gw.validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(gw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_uses_defaults() {
        let config: NodeConfig = toml::from_str("name = \"x\"").unwrap();
        assert_eq!(config.name, "x");
        assert!(config.listen_tcp && config.listen_unix);
        assert_eq!(config.log_level, "info");
        let gw = config.to_gateway_config().unwrap();
        assert_eq!(gw.effective_port(), octopussy::gateway::config::DEFAULT_TCP_PORT);
    }

    #[test]
    fn test_timing_and_peers() {
        let text = r#"
            tcp_port = 5000
            peers = ["hostb:4808", "unix:/tmp/b.sock"]
            verify_checksum = true

            [timing]
            heartbeat_secs = 1
            max_reconnect_attempts = 0
        "#;
        let config: NodeConfig = toml::from_str(text).unwrap();
        config.validate().unwrap();
        let gw = config.to_gateway_config().unwrap();
        assert_eq!(gw.tcp_port, 5000);
        assert_eq!(gw.peers, vec![Endpoint::tcp("hostb", 4808), Endpoint::unix("/tmp/b.sock")]);
        assert_eq!(gw.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(gw.max_reconnect_attempts, 0);
        assert!(gw.verify_checksum);
    }

    #[test]
    fn test_validation() {
        let mut config = NodeConfig {
            peers: vec!["no-port".into()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(m)) if m.contains("no-port")));

        config.peers.clear();
        config.timing.reconnect_secs = Some(0);
        assert!(config.validate().is_err());

        let isolated = NodeConfig {
            listen_tcp: false,
            listen_unix: false,
            ..Default::default()
        };
        assert!(isolated.validate().is_err());
    }

    #[test]
    fn test_from_file_and_example() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gw.toml");
        std::fs::write(&path, NodeConfig::example().to_toml().unwrap()).unwrap();
        let loaded = NodeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.name, "node-a");
        assert_eq!(loaded.peers, vec!["localhost:4809"]);
        assert_eq!(loaded.timing.heartbeat_secs, Some(5));

        std::fs::write(&path, "tcp_port = \"abc\"").unwrap();
        assert!(matches!(NodeConfig::from_file(&path), Err(ConfigError::Toml(_))));
    }
}
