// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway configuration.
//!
//! # Example
//!
//! ```
//! use octopussy::gateway::GatewayConfig;
//! use std::time::Duration;
//!
//! let config = GatewayConfig::default()
//!     .with_tcp_port(5000)
//!     .with_heartbeat_interval(Duration::from_secs(2));
//! assert!(config.validate().is_ok());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use super::connection_mgr::Endpoint;
use crate::error::{Error, Result};

/// TCP port used when the configured port is 0.
pub const DEFAULT_TCP_PORT: u16 = 4808;

/// Largest block size accepted by [`GatewayConfig::validate`].
const MAX_BLOCK_SIZE_LIMIT: usize = 64 * 1024 * 1024;

/// Settings shared by gateway servers, clients and connections.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    // === Listeners ===
    /// TCP listen port (0 = [`DEFAULT_TCP_PORT`])
    pub tcp_port: u16,

    /// Unix socket path (empty = `/tmp/octopussy-<uid>.sock`)
    pub socket_path: PathBuf,

    /// Open the TCP listener
    pub listen_tcp: bool,

    /// Open the Unix listener
    pub listen_unix: bool,

    // === Outbound ===
    /// Endpoints to connect to at startup (retried forever)
    pub peers: Vec<Endpoint>,

    /// Connect to endpoints announced via `GW.Server.Open`
    pub follow_announcements: bool,

    // === Framing ===
    /// Maximum block payload per DATA packet
    pub max_block_size: usize,

    /// Maximum total block bytes of one received message
    pub max_message_size: usize,

    /// Verify block checksums on receive
    pub verify_checksum: bool,

    /// Disable Nagle on TCP connections
    pub tcp_nodelay: bool,

    // === Timing ===
    /// Time allowed for the peer's handshake
    pub init_timeout: Duration,

    /// Maximum time a write may make no progress
    pub write_timeout: Duration,

    /// Heartbeat period (PING when idle, stall check)
    pub heartbeat_interval: Duration,

    /// Delay between outbound connect attempts
    pub reconnect_interval: Duration,

    /// Delay before retrying a failed bind
    pub rebind_interval: Duration,

    /// Attempts for announced peers (0 = unlimited)
    pub max_reconnect_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            tcp_port: 0,
            socket_path: PathBuf::new(),
            listen_tcp: true,
            listen_unix: true,
            peers: Vec::new(),
            follow_announcements: true,
            max_block_size: 1024 * 1024,
            max_message_size: 256 * 1024 * 1024,
            verify_checksum: cfg!(feature = "checksum"),
            tcp_nodelay: true,
            init_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(2),
            rebind_interval: Duration::from_secs(10),
            max_reconnect_attempts: 10,
        }
    }
}

impl GatewayConfig {
    /// Effective TCP port.
    pub fn effective_port(&self) -> u16 {
        if self.tcp_port == 0 {
            DEFAULT_TCP_PORT
        } else {
            self.tcp_port
        }
    }

    /// Effective Unix socket path.
    pub fn effective_socket_path(&self) -> PathBuf {
        if self.socket_path.as_os_str().is_empty() {
            default_socket_path()
        } else {
            self.socket_path.clone()
        }
    }

    pub fn with_tcp_port(mut self, port: u16) -> Self {
        self.tcp_port = port;
        self
    }

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Builder: choose which listeners to open
    pub fn with_listeners(mut self, tcp: bool, unix: bool) -> Self {
        self.listen_tcp = tcp;
        self.listen_unix = unix;
        self
    }

    pub fn with_peer(mut self, peer: Endpoint) -> Self {
        self.peers.push(peer);
        self
    }

    pub fn with_peers(mut self, peers: Vec<Endpoint>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_follow_announcements(mut self, follow: bool) -> Self {
        self.follow_announcements = follow;
        self
    }

    pub fn with_max_block_size(mut self, size: usize) -> Self {
        self.max_block_size = size;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_rebind_interval(mut self, interval: Duration) -> Self {
        self.rebind_interval = interval;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_block_size == 0 {
            return Err(Error::InvalidConfig("max_block_size must be > 0".into()));
        }
        if self.max_block_size > MAX_BLOCK_SIZE_LIMIT {
            return Err(Error::InvalidConfig(format!(
                "max_block_size too large (> {} bytes)",
                MAX_BLOCK_SIZE_LIMIT
            )));
        }
        if self.max_message_size < self.max_block_size {
            return Err(Error::InvalidConfig(
                "max_message_size must be at least max_block_size".into(),
            ));
        }
        let timings = [
            ("init_timeout", self.init_timeout),
            ("write_timeout", self.write_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("reconnect_interval", self.reconnect_interval),
            ("rebind_interval", self.rebind_interval),
        ];
        for (name, value) in timings {
            if value.is_zero() {
                return Err(Error::InvalidConfig(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }
}

/// `/tmp/octopussy-<uid>.sock`
pub fn default_socket_path() -> PathBuf {
    // SAFETY: getuid has no preconditions and cannot fail.
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/octopussy-{}.sock", uid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = GatewayConfig::default();
        assert_eq!(c.effective_port(), DEFAULT_TCP_PORT);
        assert_eq!(c.max_block_size, 1024 * 1024);
        assert_eq!(c.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(c.init_timeout, Duration::from_secs(30));
        assert_eq!(c.verify_checksum, cfg!(feature = "checksum"));
        let path = c.effective_socket_path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap();
        assert!(name.starts_with("octopussy-") && name.ends_with(".sock"));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_explicit_values_win() {
        let c = GatewayConfig::default()
            .with_tcp_port(6000)
            .with_socket_path("/run/x.sock");
        assert_eq!(c.effective_port(), 6000);
        assert_eq!(c.effective_socket_path(), PathBuf::from("/run/x.sock"));
    }

    #[test]
    fn test_validate_rejects_zero() {
        let c = GatewayConfig::default().with_max_block_size(0);
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(_))));
        let c = GatewayConfig::default().with_heartbeat_interval(Duration::ZERO);
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(m)) if m.contains("heartbeat")));
    }

    #[test]
    fn test_message_limit_not_below_block_size() {
        let c = GatewayConfig::default()
            .with_max_block_size(4096)
            .with_max_message_size(1024);
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(m)) if m.contains("max_message_size")));
        let c = c.with_max_message_size(4096);
        assert!(c.validate().is_ok());
    }
}
