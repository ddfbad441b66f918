// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound connection bookkeeping for [`super::GwClientWp`].
//!
//! Each tracked endpoint moves through:
//!
//! ```text
//!            connect()              writable + no error
//! Waiting ------------> Connecting --------------------> Connected(gateway)
//!    ^                      |                                  |
//!    |     error/timeout    |        GW.Remote.Down / gone     |
//!    +----------------------+----------------------------------+
//!
//! Connected --(GW.Remote.Duplicate)--> Redundant (dropped)
//! Waiting   --(too many attempts)----> Abandoned (dropped)
//! ```

use std::fmt;
use std::io;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use mio::net::{TcpStream, UnixStream};

use super::stream::Transport;
use crate::address::MsgAddress;
use crate::error::{Error, Result};
use crate::hiid::Hiid;
use crate::wp::InputId;

// ============================================================================
// Endpoint
// ============================================================================

/// Where to connect: `host:port` or `unix:<path>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix(path.into())
    }

    /// Start a non-blocking connect. Completion is signalled by writability.
    pub fn connect(&self) -> io::Result<Transport> {
        match self {
            Endpoint::Tcp { host, port } => {
                let addr = (host.as_str(), *port)
                    .to_socket_addrs()?
                    .next()
                    .ok_or_else(|| {
                        io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {}", host))
                    })?;
                TcpStream::connect(addr).map(Transport::Tcp)
            }
            Endpoint::Unix(path) => UnixStream::connect(path).map(Transport::Unix),
        }
    }

    /// `(host, port)` as published in control messages; port is -1 for Unix.
    pub fn label(&self) -> (String, i64) {
        match self {
            Endpoint::Tcp { host, port } => (host.clone(), i64::from(*port)),
            Endpoint::Unix(path) => (path.display().to_string(), -1),
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(Error::InvalidConfig("empty unix socket path".into()));
            }
            return Ok(Endpoint::unix(path));
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidConfig(format!("endpoint '{}' is not host:port", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::InvalidConfig(format!("endpoint '{}' has no host", s)));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("endpoint '{}' has a bad port", s)))?;
        if port == 0 {
            return Err(Error::InvalidConfig(format!("endpoint '{}' has port 0", s)));
        }
        Ok(Endpoint::tcp(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => write!(f, "[{}]:{}", host, port),
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

// ============================================================================
// Connection table
// ============================================================================

/// Why an endpoint is tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// From configuration; retried forever.
    Configured,
    /// Learned from a `GW.Server.Open` announcement of this peer.
    Announced(Hiid),
}

/// Connection progress of one endpoint.
#[derive(Debug)]
pub enum LinkState {
    Waiting { next_attempt: Instant },
    Connecting {
        stream: Transport,
        input: InputId,
        started: Instant,
    },
    Connected { gateway: MsgAddress },
    /// Closed as a duplicate of another connection; not retried.
    Redundant,
    /// Gave up after too many attempts.
    Abandoned,
}

impl LinkState {
    pub fn name(&self) -> &'static str {
        match self {
            LinkState::Waiting { .. } => "waiting",
            LinkState::Connecting { .. } => "connecting",
            LinkState::Connected { .. } => "connected",
            LinkState::Redundant => "redundant",
            LinkState::Abandoned => "abandoned",
        }
    }
}

/// One tracked endpoint.
#[derive(Debug)]
pub struct Connection {
    pub endpoint: Endpoint,
    pub origin: Origin,
    pub state: LinkState,
    /// Consecutive failed attempts.
    pub attempts: u32,
    pub failures: u64,
}

impl Connection {
    fn new(endpoint: Endpoint, origin: Origin, now: Instant) -> Self {
        Self {
            endpoint,
            origin,
            state: LinkState::Waiting { next_attempt: now },
            attempts: 0,
            failures: 0,
        }
    }

    /// Record a failure. Returns false if the connection should be dropped.
    pub fn failed(&mut self, retry_in: Duration, max_attempts: u32, now: Instant) -> bool {
        self.attempts += 1;
        self.failures += 1;
        let limited = matches!(self.origin, Origin::Announced(_)) && max_attempts > 0;
        if limited && self.attempts >= max_attempts {
            self.state = LinkState::Abandoned;
            return false;
        }
        self.state = LinkState::Waiting {
            next_attempt: now + retry_in,
        };
        true
    }
}

/// Endpoints tracked by a client, unique by endpoint.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    entries: Vec<Connection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `endpoint`. Returns the index, or `None` if already tracked.
    pub fn add(&mut self, endpoint: Endpoint, origin: Origin, now: Instant) -> Option<usize> {
        if self.contains(&endpoint) {
            return None;
        }
        self.entries.push(Connection::new(endpoint, origin, now));
        Some(self.entries.len() - 1)
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.entries.iter().any(|c| c.endpoint == *endpoint)
    }

    /// True if some entry was learned from `peer`'s announcements.
    pub fn tracks_peer(&self, peer: &Hiid) -> bool {
        self.entries
            .iter()
            .any(|c| matches!(&c.origin, Origin::Announced(p) if p == peer))
    }

    pub fn find_by_input(&self, input: InputId) -> Option<usize> {
        self.entries
            .iter()
            .position(|c| matches!(c.state, LinkState::Connecting { input: i, .. } if i == input))
    }

    pub fn find_by_gateway(&self, gateway: &MsgAddress) -> Option<usize> {
        self.entries
            .iter()
            .position(|c| matches!(c.state, LinkState::Connected { gateway: g } if g == *gateway))
    }

    /// Indices of waiting entries whose next attempt is due.
    pub fn due(&self, now: Instant) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c.state, LinkState::Waiting { next_attempt } if next_attempt <= now))
            .map(|(i, _)| i)
            .collect()
    }

    /// Drop redundant and abandoned entries.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|c| !matches!(c.state, LinkState::Redundant | LinkState::Abandoned));
        before - self.entries.len()
    }

    pub fn get(&self, idx: usize) -> Option<&Connection> {
        self.entries.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Connection> {
        self.entries.get_mut(idx)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Connection> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Connection> {
        self.entries.iter_mut()
    }
}
