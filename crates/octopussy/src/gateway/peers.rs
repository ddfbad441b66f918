// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peers reachable through this dispatcher's gateways.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::address::MsgAddress;
use crate::codec::{put_bytes, put_i64, put_u32, ByteReader};
use crate::error::{Error, Result};
use crate::hiid::Hiid;

/// What is known about one connected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Remote end of the connection as text (IP or socket path).
    pub host: String,
    /// Remote TCP port, or -1 for Unix sockets.
    pub port: i64,
    /// Local gateway owning the connection.
    pub gateway: MsgAddress,
    pub since: SystemTime,
}

/// Connected peers keyed by `process.host`.
///
/// Maintained by gateways on handshake and shutdown; at most one entry per
/// peer identity.
#[derive(Debug, Clone, Default)]
pub struct PeerList {
    peers: BTreeMap<Hiid, PeerInfo>,
}

impl PeerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `info` for `peer`. Returns false (and keeps the existing entry)
    /// if the peer is already present.
    pub fn insert(&mut self, peer: Hiid, info: PeerInfo) -> bool {
        if self.peers.contains_key(&peer) {
            return false;
        }
        self.peers.insert(peer, info);
        true
    }

    /// Remove `peer`, but only if it is owned by `gateway`.
    pub fn remove(&mut self, peer: &Hiid, gateway: &MsgAddress) -> Option<PeerInfo> {
        match self.peers.get(peer) {
            Some(info) if info.gateway == *gateway => self.peers.remove(peer),
            _ => None,
        }
    }

    pub fn get(&self, peer: &Hiid) -> Option<&PeerInfo> {
        self.peers.get(peer)
    }

    pub fn contains(&self, peer: &Hiid) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Hiid, &PeerInfo)> {
        self.peers.iter()
    }

    /// Pack the list for a handshake.
    ///
    /// ```text
    /// u32 count
    /// count x { hiid peer, u32 len + host, i64 port, i64 since_ms }
    /// ```
    ///
    /// The owning gateway is local knowledge and is not packed.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        put_u32(&mut buf, self.peers.len() as u32);
        for (peer, info) in &self.peers {
            peer.pack(&mut buf);
            put_bytes(&mut buf, info.host.as_bytes())?;
            put_i64(&mut buf, info.port);
            let since = info.since.duration_since(UNIX_EPOCH).unwrap_or_default();
            put_i64(&mut buf, i64::try_from(since.as_millis()).unwrap_or(i64::MAX));
        }
        Ok(buf)
    }
}

/// A peer as reported by the other end of a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncedPeer {
    pub peer: Hiid,
    pub host: String,
    pub port: i64,
    pub since: SystemTime,
}

/// Unpack a list produced by [`PeerList::to_bytes`].
pub fn unpack_peers(data: &[u8]) -> Result<Vec<AnnouncedPeer>> {
    let mut r = ByteReader::new(data);
    let count = r.u32("peer count")? as usize;
    // Smallest entry: empty hiid, empty host, port and timestamp.
    if count.saturating_mul(24) > r.remaining() {
        return Err(Error::Corrupt(format!("peer list claims {} entries", count)));
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let peer = Hiid::unpack(&mut r)?;
        let host = std::str::from_utf8(r.bytes("peer host")?)
            .map_err(|e| Error::Corrupt(format!("peer host: {}", e)))?
            .to_string();
        let port = r.i64("peer port")?;
        let millis = r.i64("peer timestamp")?;
        let since = UNIX_EPOCH + Duration::from_millis(u64::try_from(millis).unwrap_or(0));
        out.push(AnnouncedPeer {
            peer,
            host,
            port,
            since,
        });
    }
    r.finish("peer list")?;
    Ok(out)
}
