// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::UnixStream;
use octopussy::aid::{AID_GATEWAY_WP, AID_SUBSCRIPTIONS};
use octopussy::gateway::handshake;
use octopussy::gateway::reader::{PacketReader, ReadEvent};
use octopussy::gateway::writer::{PacketWriter, WriteStatus};
use octopussy::gateway::{GatewayConfig, GatewayWp, PeerState, Transport};
use octopussy::{
    AidRegistry, AtomicId, Context, Delivery, Dispatcher, Hiid, Message, MessageRef, MsgAddress,
    Scope, Subscriptions, WorkProcess, WpContext,
};

/// Class of [`Collector`] work processes.
pub const COLLECTOR: AtomicId = AtomicId::new(-7001);

/// Registry with the names used by tests registered.
pub fn registry() -> Arc<AidRegistry> {
    Arc::new(
        AidRegistry::standard()
            .with_names(["A", "B", "C", "D", "X"])
            .expect("Failed to register test names"),
    )
}

pub fn aid(name: &str) -> AtomicId {
    registry().lookup(name).expect("unknown test name")
}

/// Parse a dotted id against the test registry.
pub fn hiid(s: &str) -> Hiid {
    registry().parse_hiid(s).expect("bad test id")
}

/// Dispatcher with an explicit `(process, host)` identity.
pub fn dispatcher(process: i32, host: i32) -> Dispatcher {
    let ctx = Context::with_identity(registry(), AtomicId::new(process), AtomicId::new(host))
        .with_hostname("testhost");
    Dispatcher::new(ctx).expect("Failed to create dispatcher")
}

/// Gateway settings with short timers.
pub fn fast_config() -> GatewayConfig {
    GatewayConfig::default()
        .with_heartbeat_interval(Duration::from_millis(50))
        .with_reconnect_interval(Duration::from_millis(50))
        .with_rebind_interval(Duration::from_millis(50))
        .with_init_timeout(Duration::from_secs(5))
}

/// Records every message it receives.
#[derive(Default)]
pub struct Collector {
    masks: Vec<(Hiid, Scope)>,
    pub received: Vec<MessageRef>,
}

impl Collector {
    pub fn new(masks: &[(&str, Scope)]) -> Self {
        Self {
            masks: masks.iter().map(|(m, s)| (hiid(m), *s)).collect(),
            received: Vec::new(),
        }
    }

    /// Received messages whose id matches `mask`.
    pub fn matching(&self, mask: &Hiid) -> Vec<MessageRef> {
        self.received
            .iter()
            .filter(|m| mask.matches(&m.id))
            .cloned()
            .collect()
    }
}

impl WorkProcess for Collector {
    fn class(&self) -> AtomicId {
        COLLECTOR
    }

    fn init(&mut self, ctx: &mut WpContext<'_>) {
        for (mask, scope) in self.masks.clone() {
            ctx.subscribe(mask, scope);
        }
    }

    fn receive(&mut self, msg: &MessageRef, _ctx: &mut WpContext<'_>) -> Delivery {
        self.received.push(MessageRef::clone(msg));
        Delivery::Accept
    }
}

pub fn collector<'a>(dsp: &'a Dispatcher, addr: &MsgAddress) -> &'a Collector {
    dsp.wp::<Collector>(addr).expect("collector not attached")
}

/// Poll every dispatcher in turn until `done` holds or `timeout` elapses.
pub fn pump_until(
    dsps: &mut [&mut Dispatcher],
    timeout: Duration,
    mut done: impl FnMut(&[&mut Dispatcher]) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if done(dsps) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        for dsp in dsps.iter_mut() {
            dsp.poll_once(Some(Duration::from_millis(5)))
                .expect("poll failed");
        }
    }
}

/// Poll every dispatcher `rounds` times.
pub fn pump(dsps: &mut [&mut Dispatcher], rounds: usize) {
    for _ in 0..rounds {
        for dsp in dsps.iter_mut() {
            dsp.poll_once(Some(Duration::from_millis(5)))
                .expect("poll failed");
        }
    }
}

pub fn peer_state(dsp: &Dispatcher, gw: &MsgAddress) -> Option<PeerState> {
    dsp.wp::<GatewayWp>(gw).map(GatewayWp::peer_state)
}

/// Attach the two ends of a socket pair as gateways. Both dispatchers must
/// already be started.
pub fn link(a: &mut Dispatcher, b: &mut Dispatcher, config: &GatewayConfig) -> (MsgAddress, MsgAddress) {
    let (sa, sb) = UnixStream::pair().expect("Failed to create socket pair");
    let ga = a.attach(Box::new(GatewayWp::new(Transport::from(sa), config)));
    let gb = b.attach(Box::new(GatewayWp::new(Transport::from(sb), config)));
    (ga, gb)
}

/// Link two started dispatchers and wait for both handshakes.
pub fn connect(a: &mut Dispatcher, b: &mut Dispatcher) -> (MsgAddress, MsgAddress) {
    connect_with(a, b, &fast_config())
}

pub fn connect_with(
    a: &mut Dispatcher,
    b: &mut Dispatcher,
    config: &GatewayConfig,
) -> (MsgAddress, MsgAddress) {
    let (ga, gb) = link(a, b, config);
    let ok = pump_until(&mut [&mut *a, &mut *b], Duration::from_secs(5), |d| {
        peer_state(&d[0], &ga) == Some(PeerState::Connected)
            && peer_state(&d[1], &gb) == Some(PeerState::Connected)
    });
    assert!(ok, "gateways did not connect");
    (ga, gb)
}

/// Socket end that speaks the packet protocol by hand, in place of a remote
/// gateway.
pub struct RawPeer {
    sock: UnixStream,
    writer: PacketWriter,
    reader: PacketReader,
}

impl RawPeer {
    /// Attach a gateway for one end of a fresh socket pair to `dsp` and keep
    /// the other end. `dsp` must already be started.
    pub fn attach(dsp: &mut Dispatcher, config: &GatewayConfig) -> (MsgAddress, RawPeer) {
        let (ours, theirs) = UnixStream::pair().expect("Failed to create socket pair");
        let gw = dsp.attach(Box::new(GatewayWp::new(Transport::from(ours), config)));
        let peer = RawPeer {
            sock: theirs,
            writer: PacketWriter::new(),
            reader: PacketReader::new(1024 * 1024, true),
        };
        (gw, peer)
    }

    /// Packets for `msg`, using this peer's sequence numbers.
    pub fn frame(&mut self, msg: &Message) -> Vec<u8> {
        let blocks = msg.to_blocks(1024 * 1024).expect("Failed to split message");
        assert!(self.writer.enqueue_message(blocks));
        let mut out = Vec::new();
        let status = self.writer.write_to(&mut out).expect("Failed to frame");
        assert_eq!(status, WriteStatus::Done);
        out
    }

    pub fn send_bytes(&mut self, bytes: &[u8]) {
        self.sock.write_all(bytes).expect("Failed to write to gateway");
    }

    pub fn send(&mut self, msg: &Message) {
        let bytes = self.frame(msg);
        self.send_bytes(&bytes);
    }

    /// Decode everything the gateway has written so far.
    pub fn events(&mut self) -> Vec<ReadEvent> {
        let mut buf = [0u8; 16 * 1024];
        loop {
            match self.sock.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.reader.feed(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => panic!("raw peer read failed: {}", e),
            }
        }
        std::iter::from_fn(|| self.reader.next_event()).collect()
    }
}

/// Handshake of a gateway in process `(process, host)` with no work
/// processes behind it.
pub fn bare_handshake(process: i32, host: i32) -> Message {
    let none: [(&MsgAddress, &Subscriptions); 0] = [];
    let mut msg = Message::new(AID_SUBSCRIPTIONS).with_data(handshake::pack(none));
    msg.from = MsgAddress::new(
        AID_GATEWAY_WP,
        AtomicId::new(1),
        AtomicId::new(process),
        AtomicId::new(host),
    );
    msg.to = MsgAddress::any();
    msg
}
