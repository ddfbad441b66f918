// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Daemon work processes: gateway event monitor and signal-driven shutdown.

use octopussy::aid::{
    AID_CLIENT, AID_DOWN, AID_DUPLICATE, AID_ERROR, AID_GW, AID_HOST, AID_LOGGER_WP, AID_OPEN,
    AID_PORT, AID_REMOTE, AID_SERVER, AID_TEXT, AID_UP,
};
use octopussy::{AtomicId, Delivery, Hiid, MessageRef, Scope, SignalMode, WorkProcess, WpContext};

/// Gateway events seen by [`MonitorWp`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStats {
    pub peers_up: u64,
    pub peers_down: u64,
    pub duplicates: u64,
    pub servers_open: u64,
    pub server_errors: u64,
    pub connect_failures: u64,
}

/// Logs `GW.*` traffic: peers coming and going, listeners, failures.
#[derive(Debug, Default)]
pub struct MonitorWp {
    node: String,
    stats: MonitorStats,
}

impl MonitorWp {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            stats: MonitorStats::default(),
        }
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }
}

fn endpoint(msg: &MessageRef) -> (String, i64) {
    let payload = msg.payload.as_ref();
    let host = payload
        .and_then(|p| p.get_text(AID_HOST))
        .unwrap_or("?")
        .to_string();
    let port = payload.and_then(|p| p.get_int(AID_PORT)).unwrap_or(-1);
    (host, port)
}

impl WorkProcess for MonitorWp {
    fn class(&self) -> AtomicId {
        AID_LOGGER_WP
    }

    fn init(&mut self, ctx: &mut WpContext<'_>) {
        ctx.subscribe(Hiid::from([AID_GW, AtomicId::WILDCARD]), Scope::Global);
    }

    fn receive(&mut self, msg: &MessageRef, ctx: &mut WpContext<'_>) -> Delivery {
        let id = ctx.registry().display(&msg.id).to_string();
        let (host, port) = endpoint(msg);
        let node = self.node.as_str();
        let text = msg
            .payload
            .as_ref()
            .and_then(|p| p.get_text(AID_TEXT))
            .unwrap_or("");
        match (msg.id.get(1), msg.id.get(2)) {
            (Some(AID_REMOTE), Some(AID_UP)) => {
                self.stats.peers_up += 1;
                tracing::info!(node, %id, %host, port, "peer connected");
            }
            (Some(AID_REMOTE), Some(AID_DOWN)) => {
                self.stats.peers_down += 1;
                tracing::warn!(node, %id, %host, port, "peer disconnected");
            }
            (Some(AID_REMOTE), Some(AID_DUPLICATE)) => {
                self.stats.duplicates += 1;
                tracing::info!(node, %id, %host, port, "duplicate connection closed");
            }
            (Some(AID_SERVER), Some(AID_OPEN)) => {
                self.stats.servers_open += 1;
                tracing::info!(node, from = %msg.from.display(ctx.registry()), %host, port, "server open");
            }
            (Some(AID_SERVER), Some(AID_ERROR)) => {
                self.stats.server_errors += 1;
                tracing::error!(node, %id, %host, port, text, "server error");
            }
            (Some(AID_CLIENT), _) => {
                self.stats.connect_failures += 1;
                tracing::debug!(node, %host, port, text, "connect failed");
            }
            _ => tracing::trace!(node, %id, "gateway event"),
        }
        Delivery::Accept
    }
}

/// Stops the dispatcher on SIGINT or SIGTERM and ignores SIGPIPE.
#[derive(Debug)]
pub struct ShutdownWp {
    class: AtomicId,
}

impl ShutdownWp {
    pub fn new(class: AtomicId) -> Self {
        Self { class }
    }
}

impl WorkProcess for ShutdownWp {
    fn class(&self) -> AtomicId {
        self.class
    }

    fn start(&mut self, ctx: &mut WpContext<'_>) -> bool {
        let signals = [
            (libc::SIGINT, SignalMode::Deliver),
            (libc::SIGTERM, SignalMode::Deliver),
            (libc::SIGPIPE, SignalMode::Ignore),
        ];
        for (signum, mode) in signals {
            if let Err(e) = ctx.add_signal(signum, mode) {
                tracing::error!(signum, error = %e, "cannot install signal handler");
            }
        }
        false
    }

    fn signal(&mut self, signum: i32, ctx: &mut WpContext<'_>) {
        tracing::info!(signum, "shutting down");
        ctx.stop_dispatcher();
    }
}
