// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! GwClientWp: opens outbound connections to peers.
//!
//! Configured endpoints are retried forever. Endpoints learned from
//! `GW.Server.Open` announcements are followed only when this process wins
//! the tie-break (the lower `(process, host)` connects), so two processes
//! hearing each other's announcements open one link rather than two.

use std::io;
use std::time::Instant;

use super::config::GatewayConfig;
use super::connection_mgr::{ConnectionTable, Endpoint, LinkState, Origin};
use super::gateway_wp::GatewayWp;
use super::{client_fail_connect, remote_pattern, server_open_pattern};
use crate::address::{MsgAddress, Scope};
use crate::aid::{
    AtomicId, AID_DOWN, AID_DUPLICATE, AID_GW, AID_GW_CLIENT_WP, AID_HOST, AID_LOCAL,
    AID_NETWORK, AID_PORT, AID_RECONNECT, AID_REMOTE, AID_TEXT,
};
use crate::hiid::Hiid;
use crate::message::{Message, MessageRef};
use crate::record::Record;
use crate::wp::{Delivery, InputFlags, InputId, TimerMode, WorkProcess, WpContext};

/// Outbound connection work process.
pub struct GwClientWp {
    config: GatewayConfig,
    table: ConnectionTable,
    connected_total: u64,
}

impl GwClientWp {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            config: config.clone(),
            table: ConnectionTable::new(),
            connected_total: 0,
        }
    }

    /// Tracked endpoints and their state.
    pub fn connections(&self) -> &ConnectionTable {
        &self.table
    }

    /// Connections established since start.
    pub fn connected_total(&self) -> u64 {
        self.connected_total
    }

    fn try_connect(&mut self, idx: usize, ctx: &mut WpContext<'_>) {
        let Some(conn) = self.table.get_mut(idx) else {
            return;
        };
        log::debug!("[gw-client] connecting to {} (attempt {})", conn.endpoint, conn.attempts + 1);
        let mut stream = match conn.endpoint.connect() {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(idx, &e, ctx);
                return;
            }
        };
        match ctx.add_input(&mut stream, InputFlags::READ | InputFlags::WRITE) {
            Ok(input) => {
                conn.state = LinkState::Connecting {
                    stream,
                    input,
                    started: Instant::now(),
                };
            }
            Err(e) => self.fail(idx, &e, ctx),
        }
    }

    /// Record a failed attempt, announce it and schedule the next one.
    fn fail(&mut self, idx: usize, err: &io::Error, ctx: &mut WpContext<'_>) {
        let retry_in = self.config.reconnect_interval;
        let max_attempts = self.config.max_reconnect_attempts;
        let Some(conn) = self.table.get_mut(idx) else {
            return;
        };
        if let LinkState::Connecting { mut stream, input, .. } =
            std::mem::replace(&mut conn.state, LinkState::Abandoned)
        {
            if let Err(e) = ctx.remove_input(&mut stream, input) {
                log::debug!("[gw-client] deregister {}: {}", conn.endpoint, e);
            }
        }
        if conn.failures == 0 {
            log::warn!(
                "[gw-client] cannot connect to {}: {}; retrying every {:?}",
                conn.endpoint,
                err,
                retry_in
            );
        } else {
            log::debug!("[gw-client] connect to {} failed again: {}", conn.endpoint, err);
        }
        let (host, port) = conn.endpoint.label();
        if !conn.failed(retry_in, max_attempts, Instant::now()) {
            log::info!(
                "[gw-client] giving up on {} after {} attempts",
                conn.endpoint,
                conn.attempts
            );
        }
        let msg = Message::new(client_fail_connect()).with_payload(
            Record::new()
                .with(AID_HOST, host)
                .with(AID_PORT, port)
                .with(AID_TEXT, err.to_string()),
        );
        ctx.publish(msg, Scope::Local);
    }

    /// The socket became ready: hand it to a gateway, or record the failure.
    fn complete(&mut self, idx: usize, ctx: &mut WpContext<'_>) -> Delivery {
        let Some(conn) = self.table.get_mut(idx) else {
            return Delivery::Cancel;
        };
        let LinkState::Connecting { stream, .. } = &conn.state else {
            return Delivery::Cancel;
        };
        let error = match stream.take_error() {
            Ok(Some(e)) | Err(e) => Some(e),
            Ok(None) if !stream.is_connected() => {
                // Spurious wakeup while the handshake is still in flight.
                return Delivery::Accept;
            }
            Ok(None) => None,
        };
        if let Some(e) = error {
            self.fail(idx, &e, ctx);
            return Delivery::Cancel;
        }
        let LinkState::Connecting { mut stream, input, .. } =
            std::mem::replace(&mut conn.state, LinkState::Abandoned)
        else {
            return Delivery::Cancel;
        };
        if let Err(e) = ctx.remove_input(&mut stream, input) {
            log::debug!("[gw-client] deregister {}: {}", conn.endpoint, e);
        }
        log::info!("[gw-client] connected to {}", conn.endpoint);
        let gateway = ctx.attach(Box::new(GatewayWp::new(stream, &self.config)));
        conn.state = LinkState::Connected { gateway };
        conn.attempts = 0;
        self.connected_total += 1;
        Delivery::Cancel
    }

    fn reconnect_tick(&mut self, ctx: &mut WpContext<'_>) {
        let now = Instant::now();
        let live: Vec<MsgAddress> = ctx.attached().map(|(addr, _)| *addr).collect();
        let mut stalled = Vec::new();
        for (idx, conn) in self.table.iter_mut().enumerate() {
            match &conn.state {
                LinkState::Connected { gateway } if !live.contains(gateway) => {
                    log::debug!("[gw-client] link to {} is gone", conn.endpoint);
                    conn.state = LinkState::Waiting { next_attempt: now };
                }
                LinkState::Connecting { started, .. }
                    if now.duration_since(*started) >= self.config.init_timeout =>
                {
                    stalled.push(idx);
                }
                _ => {}
            }
        }
        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
        for idx in stalled {
            self.fail(idx, &timed_out, ctx);
        }
        for idx in self.table.due(now) {
            self.try_connect(idx, ctx);
        }
        self.table.prune();
    }

    /// Endpoint to use for a `GW.Server.Open` announcement, if we should follow it.
    fn announced_endpoint(&self, msg: &Message, ctx: &WpContext<'_>) -> Option<(Hiid, Endpoint)> {
        if !self.config.follow_announcements {
            return None;
        }
        let own = ctx.context();
        let (process, host) = (msg.from.process, msg.from.host);
        if process == own.process() && host == own.host() {
            return None;
        }
        let peer = msg.from.peer_id();
        if ctx.peers().contains(&peer) || self.table.tracks_peer(&peer) {
            return None;
        }
        // The lower (process, host) side connects.
        if (own.process(), own.host()) >= (process, host) {
            return None;
        }
        let kind = msg.id.get(3)?;
        let payload = msg.payload.as_ref()?;
        let announced_host = payload.get_text(AID_HOST)?;
        let port = payload.get_int(AID_PORT)?;
        let endpoint = if kind == AID_LOCAL {
            if host != own.host() {
                return None;
            }
            Endpoint::unix(announced_host)
        } else if kind == AID_NETWORK {
            Endpoint::tcp(announced_host, u16::try_from(port).ok().filter(|p| *p > 0)?)
        } else {
            return None;
        };
        if self.table.contains(&endpoint) {
            return None;
        }
        Some((peer, endpoint))
    }

    fn on_remote(&mut self, msg: &Message, ctx: &WpContext<'_>) {
        let Some(idx) = self.table.find_by_gateway(&msg.from) else {
            return;
        };
        let Some(conn) = self.table.get_mut(idx) else {
            return;
        };
        match msg.id.get(2) {
            Some(kind) if kind == AID_DOWN => {
                log::info!(
                    "[gw-client] link to {} went down ({})",
                    conn.endpoint,
                    ctx.registry().display(&msg.id)
                );
                conn.state = LinkState::Waiting {
                    next_attempt: Instant::now() + self.config.reconnect_interval,
                };
            }
            Some(kind) if kind == AID_DUPLICATE => {
                log::info!("[gw-client] link to {} duplicates an existing one", conn.endpoint);
                conn.state = LinkState::Redundant;
            }
            _ => {}
        }
    }
}

impl WorkProcess for GwClientWp {
    fn class(&self) -> AtomicId {
        AID_GW_CLIENT_WP
    }

    fn init(&mut self, ctx: &mut WpContext<'_>) {
        ctx.subscribe(server_open_pattern(), Scope::Global);
        ctx.subscribe(remote_pattern(), Scope::Local);
    }

    fn start(&mut self, ctx: &mut WpContext<'_>) -> bool {
        let now = Instant::now();
        for endpoint in self.config.peers.clone() {
            if self.table.add(endpoint.clone(), Origin::Configured, now).is_none() {
                log::warn!("[gw-client] peer {} listed twice", endpoint);
            }
        }
        for idx in self.table.due(now) {
            self.try_connect(idx, ctx);
        }
        ctx.add_timeout(self.config.reconnect_interval, AID_RECONNECT, TimerMode::Continuous);
        false
    }

    fn stop(&mut self, ctx: &mut WpContext<'_>) {
        for conn in self.table.iter_mut() {
            if let LinkState::Connecting { stream, input, .. } = &mut conn.state {
                if let Err(e) = ctx.remove_input(stream, *input) {
                    log::debug!("[gw-client] deregister {}: {}", conn.endpoint, e);
                }
            }
        }
    }

    fn receive(&mut self, msg: &MessageRef, ctx: &mut WpContext<'_>) -> Delivery {
        let remote = Hiid::from([AID_GW, AID_REMOTE]);
        if msg.id.prefixed_by(&remote) {
            self.on_remote(msg, ctx);
        } else if let Some((peer, endpoint)) = self.announced_endpoint(msg, ctx) {
            log::info!(
                "[gw-client] following announcement of {} at {}",
                ctx.registry().display(&peer),
                endpoint
            );
            if let Some(idx) = self.table.add(endpoint, Origin::Announced(peer), Instant::now()) {
                self.try_connect(idx, ctx);
            }
        }
        Delivery::Accept
    }

    fn timeout(&mut self, id: &Hiid, ctx: &mut WpContext<'_>) -> Delivery {
        if *id == Hiid::from(AID_RECONNECT) {
            self.reconnect_tick(ctx);
        }
        Delivery::Accept
    }

    fn input(&mut self, input: InputId, _flags: InputFlags, ctx: &mut WpContext<'_>) -> Delivery {
        match self.table.find_by_input(input) {
            Some(idx) => self.complete(idx, ctx),
            None => Delivery::Cancel,
        }
    }
}

impl std::fmt::Debug for GwClientWp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GwClientWp")
            .field("connections", &self.table.len())
            .field("connected_total", &self.connected_total)
            .finish()
    }
}
