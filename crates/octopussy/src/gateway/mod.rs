// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateways: connecting dispatchers across processes and hosts.
//!
//! # Architecture
//!
//! ```text
//!   Dispatcher A                                   Dispatcher B
//! +----------------+                             +----------------+
//! | GwServerWp     |<------- accept ------------ | GwClientWp     |
//! |   |            |                             |   |            |
//! |   v            |     framed packets          |   v            |
//! | GatewayWp  <===============================> GatewayWp      |
//! |  (forwarder)   |  handshake, Subscribe, Bye, |  (forwarder)   |
//! |                |  application messages      |                |
//! +----------------+                             +----------------+
//! ```
//!
//! Servers announce their endpoints as `GW.Server.Open.*`; clients connect
//! to configured peers and to announced endpoints. Each connected socket is
//! owned by one [`GatewayWp`], which routes traffic using its copy of the
//! peer's subscriptions.
//!
//! # Control messages
//!
//! | Id | Scope | Payload |
//! |----|-------|---------|
//! | `GW.Server.Open.{Local,Network}` | global | Host, Port |
//! | `GW.Server.Error.{Bind,Fatal}` | local | Host, Port, Text |
//! | `GW.Remote.Up.<process>.<host>` | global | Host, Port, Peers |
//! | `GW.Remote.{Down,Duplicate}.<process>.<host>` | local | Host, Port |
//! | `GW.Client.FailConnect` | local | Host, Port, Text |

pub mod client;
pub mod config;
pub mod connection_mgr;
mod gateway_wp;
pub mod handshake;
pub mod peers;
pub mod reader;
pub mod server;
pub mod stream;
pub mod wire;
pub mod writer;

pub use client::GwClientWp;
pub use config::GatewayConfig;
pub use connection_mgr::Endpoint;
pub use gateway_wp::{GatewayWp, PeerState};
pub use peers::{unpack_peers, AnnouncedPeer, PeerInfo, PeerList};
pub use server::{GwServerWp, ListenerKind};
pub use stream::Transport;

use crate::address::MsgAddress;
use crate::aid::{
    AtomicId, AID_BIND, AID_CLIENT, AID_DOWN, AID_DUPLICATE, AID_ERROR, AID_FAIL_CONNECT,
    AID_FATAL, AID_GW, AID_LOCAL, AID_NETWORK, AID_OPEN, AID_REMOTE, AID_SERVER, AID_UP,
};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::hiid::Hiid;

/// Hop limit for re-forwarding `GW.Server.Open` announcements.
///
/// Sized for a fully connected topology; a sparser mesh may need more.
pub const MAX_ANNOUNCE_HOPS: u32 = 3;

// ============================================================================
// Control ids
// ============================================================================

/// `GW.Server.Open`
pub fn server_open() -> Hiid {
    Hiid::from([AID_GW, AID_SERVER, AID_OPEN])
}

/// `GW.Server.Open.*`
pub fn server_open_pattern() -> Hiid {
    server_open().with(AtomicId::WILDCARD)
}

/// `GW.Server.Open.Local` or `GW.Server.Open.Network`.
pub fn server_open_kind(kind: ListenerKind) -> Hiid {
    match kind {
        ListenerKind::Unix => server_open().with(AID_LOCAL),
        ListenerKind::Tcp => server_open().with(AID_NETWORK),
    }
}

/// `GW.Server.Error.Bind`
pub fn server_error_bind() -> Hiid {
    Hiid::from([AID_GW, AID_SERVER, AID_ERROR, AID_BIND])
}

/// `GW.Server.Error.Fatal`
pub fn server_error_fatal() -> Hiid {
    Hiid::from([AID_GW, AID_SERVER, AID_ERROR, AID_FATAL])
}

/// `GW.Remote.*`
pub fn remote_pattern() -> Hiid {
    Hiid::from([AID_GW, AID_REMOTE, AtomicId::WILDCARD])
}

/// `GW.Remote.Up.<peer>`
pub fn remote_up(peer: &Hiid) -> Hiid {
    Hiid::from([AID_GW, AID_REMOTE, AID_UP]).concat(peer)
}

/// `GW.Remote.Down.<peer>`
pub fn remote_down(peer: &Hiid) -> Hiid {
    Hiid::from([AID_GW, AID_REMOTE, AID_DOWN]).concat(peer)
}

/// `GW.Remote.Duplicate.<peer>`
pub fn remote_duplicate(peer: &Hiid) -> Hiid {
    Hiid::from([AID_GW, AID_REMOTE, AID_DUPLICATE]).concat(peer)
}

/// `GW.Client.FailConnect`
pub fn client_fail_connect() -> Hiid {
    Hiid::from([AID_GW, AID_CLIENT, AID_FAIL_CONNECT])
}

// ============================================================================
// Setup
// ============================================================================

/// Attach the TCP and Unix servers and the client with default settings.
///
/// `tcp_port` 0 selects the default port; an empty `socket_path` selects the
/// default socket.
pub fn init_gateways(dsp: &mut Dispatcher, tcp_port: u16, socket_path: &str) -> Result<Vec<MsgAddress>> {
    let config = GatewayConfig::default()
        .with_tcp_port(tcp_port)
        .with_socket_path(socket_path);
    init_gateways_with(dsp, &config)
}

/// Attach servers and client according to `config`.
pub fn init_gateways_with(dsp: &mut Dispatcher, config: &GatewayConfig) -> Result<Vec<MsgAddress>> {
    config.validate()?;
    let mut attached = Vec::with_capacity(3);
    if config.listen_tcp {
        attached.push(dsp.attach(Box::new(GwServerWp::new(ListenerKind::Tcp, config))));
    }
    if config.listen_unix {
        attached.push(dsp.attach(Box::new(GwServerWp::new(ListenerKind::Unix, config))));
    }
    attached.push(dsp.attach(Box::new(GwClientWp::new(config))));
    log::info!(
        "[gateway] initialized: tcp port {}, socket {}, {} configured peers",
        if config.listen_tcp { config.effective_port().to_string() } else { "-".into() },
        if config.listen_unix {
            config.effective_socket_path().display().to_string()
        } else {
            "-".into()
        },
        config.peers.len()
    );
    Ok(attached)
}
