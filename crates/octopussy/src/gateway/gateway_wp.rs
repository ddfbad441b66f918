// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! GatewayWp: bridges the local dispatcher to one peer over a socket.
//!
//! # Peer state
//!
//! ```text
//!                 peer handshake
//! INITIALIZING ------------------> CONNECTED
//!      |                               |
//!      | init timeout / bad handshake  | I/O error, EOF, write stall
//!      | duplicate peer                |
//!      v                               v
//!   CLOSING <--------------------------+
//!      |
//!      +--> detach (immediately, or once the current write finishes)
//! ```
//!
//! The first message in each direction is the handshake (`Subscriptions`)
//! carrying every local work process with its subscriptions. It becomes the
//! peer's routing table (`remote_subs`), later kept current by `Subscribe`
//! and `Bye` traffic.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::time::{Instant, SystemTime};

use super::config::GatewayConfig;
use super::handshake;
use super::peers::{unpack_peers, AnnouncedPeer, PeerInfo};
use super::reader::{PacketReader, ReadEvent, ReaderStats};
use super::stream::Transport;
use super::wire::PacketType;
use super::writer::{PacketWriter, WriteStatus, WriterStats};
use super::{remote_down, remote_duplicate, remote_up, server_open_pattern, MAX_ANNOUNCE_HOPS};
use crate::address::{MsgAddress, Scope};
use crate::aid::{
    AtomicId, AID_BYE, AID_GATEWAY_WP, AID_GW, AID_HEARTBEAT, AID_HELLO, AID_HOST, AID_INIT,
    AID_PEERS, AID_PORT, AID_REMOTE, AID_SUBSCRIBE, AID_SUBSCRIPTIONS, AID_UP,
};
use crate::error::Error;
use crate::hiid::Hiid;
use crate::message::{Message, MessageRef};
use crate::record::{Record, Value};
use crate::subscriptions::Subscriptions;
use crate::wp::{Delivery, InputFlags, InputId, TimerMode, WorkProcess, WpContext};

/// Socket read chunk size.
const READ_CHUNK: usize = 64 * 1024;

/// Statistics are logged every this many heartbeats.
const STATS_EVERY: u64 = 4;

/// Connection state with the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Initializing,
    Connected,
    Closing,
}

/// Work process owning one peer connection.
pub struct GatewayWp {
    config: GatewayConfig,
    stream: Transport,
    input: Option<InputId>,
    address: MsgAddress,
    reader: PacketReader,
    writer: PacketWriter,
    read_buf: Vec<u8>,
    /// Message accepted while the writer was busy.
    pending: Option<MessageRef>,
    state: PeerState,
    remote_subs: BTreeMap<MsgAddress, Subscriptions>,
    /// `(process, host)` of the peer, known after the handshake.
    remote: Option<(AtomicId, AtomicId)>,
    /// Peers the remote side was connected to at handshake time.
    remote_peers: Vec<AnnouncedPeer>,
    peer_host: String,
    peer_port: i64,
    ticks: u64,
    last_report: (u64, u64, Instant),
}

impl GatewayWp {
    /// Wrap a connected stream.
    pub fn new(stream: Transport, config: &GatewayConfig) -> Self {
        let (peer_host, peer_port) = stream.peer_label();
        Self {
            reader: PacketReader::new(config.max_block_size, config.verify_checksum)
                .with_max_message_size(config.max_message_size),
            writer: PacketWriter::new(),
            config: config.clone(),
            stream,
            input: None,
            address: MsgAddress::default(),
            read_buf: vec![0; READ_CHUNK],
            pending: None,
            state: PeerState::Initializing,
            remote_subs: BTreeMap::new(),
            remote: None,
            remote_peers: Vec::new(),
            peer_host,
            peer_port,
            ticks: 0,
            last_report: (0, 0, Instant::now()),
        }
    }

    pub fn peer_state(&self) -> PeerState {
        self.state
    }

    /// Routing table: remote work processes and their subscriptions.
    pub fn remote_subs(&self) -> &BTreeMap<MsgAddress, Subscriptions> {
        &self.remote_subs
    }

    /// `process.host` of the peer, once connected.
    pub fn peer_id(&self) -> Option<Hiid> {
        self.remote.map(|(p, h)| Hiid::from([p, h]))
    }

    /// Peer list sent by the remote side in its handshake.
    pub fn remote_peers(&self) -> &[AnnouncedPeer] {
        &self.remote_peers
    }

    /// `(host, port)` of the remote end of the socket.
    pub fn peer_endpoint(&self) -> (&str, i64) {
        (&self.peer_host, self.peer_port)
    }

    pub fn reader_stats(&self) -> ReaderStats {
        self.reader.stats()
    }

    pub fn writer_stats(&self) -> WriterStats {
        self.writer.stats()
    }

    fn endpoint_record(&self) -> Record {
        Record::new()
            .with(AID_HOST, self.peer_host.as_str())
            .with(AID_PORT, self.peer_port)
    }

    // ------------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------------

    /// Serialize `msg` into the writer. The writer must be idle.
    fn enqueue(&mut self, msg: &Message, ctx: &WpContext<'_>) -> bool {
        match msg.to_blocks(self.config.max_block_size) {
            Ok(blocks) => {
                log::trace!(
                    "[gateway] {} queueing [{}] in {} blocks",
                    self.address,
                    ctx.registry().display(&msg.id),
                    blocks.len()
                );
                self.writer.enqueue_message(blocks)
            }
            Err(e) => {
                log::error!(
                    "[gateway] {} cannot serialize [{}]: {}",
                    self.address,
                    ctx.registry().display(&msg.id),
                    e
                );
                false
            }
        }
    }

    /// Push queued data into the socket until done or blocked.
    fn flush(&mut self, ctx: &mut WpContext<'_>) {
        loop {
            match self.writer.write_to(&mut self.stream) {
                Ok(WriteStatus::Blocked) => return,
                Ok(WriteStatus::Done) => {
                    if self.state == PeerState::Closing {
                        log::info!("[gateway] {} write finished, shutting down", self.address);
                        self.close(ctx);
                        return;
                    }
                    match self.pending.take() {
                        Some(msg) => {
                            self.enqueue(&msg, ctx);
                        }
                        None => return,
                    }
                }
                Err(e) => {
                    log::error!("[gateway] {} socket write: {}, aborting", self.address, e);
                    self.shutdown(ctx);
                    return;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    fn read_socket(&mut self, ctx: &mut WpContext<'_>) {
        while self.state != PeerState::Closing {
            match self.stream.read(&mut self.read_buf) {
                Ok(0) => {
                    log::info!("[gateway] {} peer closed the connection", self.address);
                    self.shutdown(ctx);
                }
                Ok(n) => {
                    self.reader.feed(&self.read_buf[..n]);
                    self.process_events(ctx);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::error!("[gateway] {} socket read: {}, aborting", self.address, e);
                    self.shutdown(ctx);
                }
            }
        }
    }

    fn process_events(&mut self, ctx: &mut WpContext<'_>) {
        while self.state != PeerState::Closing {
            let Some(event) = self.reader.next_event() else {
                return;
            };
            match event {
                ReadEvent::Message(blocks) => self.process_incoming(&blocks, ctx),
                ReadEvent::Ping => log::trace!("[gateway] {} PING", self.address),
                ReadEvent::Ack => log::trace!("[gateway] {} ACK", self.address),
                ReadEvent::RetryRequested => log::warn!(
                    "[gateway] {} peer requested a retransmission; message lost",
                    self.address
                ),
                ReadEvent::ChecksumFailed => {
                    if self.writer.queue_control(PacketType::Retry) {
                        self.flush(ctx);
                    }
                }
            }
        }
    }

    fn process_incoming(&mut self, blocks: &[Vec<u8>], ctx: &mut WpContext<'_>) {
        let mut msg = match Message::from_blocks(blocks) {
            Ok(msg) => msg,
            Err(e) if self.state == PeerState::Initializing => {
                log::error!("[gateway] {} corrupt handshake: {}", self.address, e);
                self.shutdown(ctx);
                return;
            }
            Err(e) => {
                log::warn!("[gateway] {} dropping undecodable message: {}", self.address, e);
                return;
            }
        };
        msg.forwarder = self.address;
        msg.hops += 1;
        log::trace!(
            "[gateway] {} received [{}] from {}",
            self.address,
            ctx.registry().display(&msg.id),
            msg.from
        );

        match self.state {
            PeerState::Connected => {
                self.update_routing(&msg, ctx);
                ctx.forward(msg.into_ref());
            }
            PeerState::Initializing => self.process_handshake(msg, ctx),
            PeerState::Closing => {}
        }
    }

    /// Apply `Subscribe` and `Bye` traffic to the routing table.
    fn update_routing(&mut self, msg: &Message, ctx: &WpContext<'_>) {
        if msg.id.prefixed_by(&Hiid::from(AID_BYE)) {
            if self.remote_subs.remove(&msg.from).is_some() {
                log::debug!("[gateway] {} Bye from {}, routing entry removed", self.address, msg.from);
            } else {
                log::warn!("[gateway] {} Bye from unknown remote {}", self.address, msg.from);
            }
        } else if msg.id.prefixed_by(&Hiid::from(AID_SUBSCRIBE)) {
            match msg.data.as_deref().map(Subscriptions::from_bytes) {
                Some(Ok(subs)) => {
                    log::debug!(
                        "[gateway] {} {} now has {} subscriptions",
                        self.address,
                        msg.from.display(ctx.registry()),
                        subs.len()
                    );
                    self.remote_subs.insert(msg.from, subs);
                }
                Some(Err(e)) => {
                    log::warn!("[gateway] {} ignoring bad Subscribe: {}", self.address, e)
                }
                None => log::warn!("[gateway] {} ignoring empty Subscribe", self.address),
            }
        }
    }

    fn process_handshake(&mut self, msg: Message, ctx: &mut WpContext<'_>) {
        if msg.id != Hiid::from(AID_SUBSCRIPTIONS) {
            log::error!(
                "[gateway] {} unexpected first message [{}]",
                self.address,
                ctx.registry().display(&msg.id)
            );
            self.shutdown(ctx);
            return;
        }
        let entries = match msg.data.as_deref() {
            Some(data) => handshake::unpack(data),
            None => Err(Error::Corrupt("handshake without data".into())),
        };
        let entries = match entries {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("[gateway] {} bad handshake: {}", self.address, e);
                self.shutdown(ctx);
                return;
            }
        };
        let packed_peers = match msg.payload.as_ref().and_then(|p| p.get(AID_PEERS)) {
            Some(Value::Bytes(data)) => Some(data.clone()),
            Some(_) => {
                log::error!("[gateway] {} handshake peer list is not a byte block", self.address);
                self.shutdown(ctx);
                return;
            }
            None => None,
        };
        let remote_peers = match packed_peers.as_deref().map(unpack_peers).transpose() {
            Ok(peers) => peers.unwrap_or_default(),
            Err(e) => {
                log::error!("[gateway] {} bad handshake peer list: {}", self.address, e);
                self.shutdown(ctx);
                return;
            }
        };

        let peer_id = msg.from.peer_id();
        self.remote = Some((msg.from.process, msg.from.host));

        if ctx.context().is_exactly_local(&msg.from) {
            log::error!("[gateway] {} connected to itself, closing", self.address);
            self.remote = None;
            self.shutdown(ctx);
            return;
        }

        if let Some(existing) = ctx.peers().get(&peer_id) {
            log::warn!(
                "[gateway] {} already connected to {} ({}:{} via {}), closing duplicate",
                self.address,
                peer_id,
                existing.host,
                existing.port,
                existing.gateway
            );
            let notice = Message::new(remote_duplicate(&peer_id)).with_payload(self.endpoint_record());
            ctx.publish(notice, Scope::Local);
            self.state = PeerState::Closing;
            if self.writer.is_idle() && self.pending.is_none() {
                self.close(ctx);
            } else if let Some(input) = self.input {
                log::info!("[gateway] {} will shut down once the write completes", self.address);
                if let Err(e) = ctx.modify_input(&mut self.stream, input, InputFlags::WRITE) {
                    log::warn!("[gateway] {} cannot stop reading: {}", self.address, e);
                    self.close(ctx);
                }
            }
            return;
        }

        ctx.peers_mut().insert(
            peer_id.clone(),
            PeerInfo {
                host: self.peer_host.clone(),
                port: self.peer_port,
                gateway: self.address,
                since: SystemTime::now(),
            },
        );
        self.remote_subs = entries.into_iter().collect();
        self.remote_peers = remote_peers;
        self.state = PeerState::Connected;
        ctx.remove_timeout(&Hiid::from(AID_INIT));
        log::info!(
            "[gateway] {} connected to peer {} ({}:{}), {} remote work processes, {} remote peers",
            self.address,
            peer_id,
            self.peer_host,
            self.peer_port,
            self.remote_subs.len(),
            self.remote_peers.len()
        );

        let mut record = self.endpoint_record();
        if let Some(peers) = packed_peers {
            record.set(AID_PEERS, peers);
        }
        let up = Message::new(remote_up(&peer_id)).with_payload(record);
        ctx.publish(up, Scope::Global);

        let local = ctx.context().publish_address(Scope::Local);
        for addr in self.remote_subs.keys() {
            let mut hello = Message::new(Hiid::from(AID_HELLO).concat(&addr.to_hiid()));
            hello.from = *addr;
            hello.to = local;
            hello.hops = 1;
            hello.forwarder = self.address;
            ctx.forward(hello.into_ref());
        }

        ctx.declare_forwarder();
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Fatal error on this connection: announce the loss and detach.
    fn shutdown(&mut self, ctx: &mut WpContext<'_>) {
        if self.state == PeerState::Closing {
            self.close(ctx);
            return;
        }
        if self.state == PeerState::Connected {
            if let Some(peer_id) = self.peer_id() {
                log::info!("[gateway] {} shutting down connection to {}", self.address, peer_id);
                ctx.peers_mut().remove(&peer_id, &self.address);
                let down = Message::new(remote_down(&peer_id)).with_payload(self.endpoint_record());
                ctx.publish(down, Scope::Local);
            }
        } else {
            log::info!(
                "[gateway] {} shutting down ({}:{})",
                self.address,
                self.peer_host,
                self.peer_port
            );
        }
        self.state = PeerState::Closing;
        self.close(ctx);
    }

    fn close(&mut self, ctx: &mut WpContext<'_>) {
        self.release_socket(ctx);
        ctx.detach();
    }

    fn release_socket(&mut self, ctx: &mut WpContext<'_>) {
        if let Some(input) = self.input.take() {
            if let Err(e) = ctx.remove_input(&mut self.stream, input) {
                log::debug!("[gateway] {} deregister: {}", self.address, e);
            }
            let _ = self.stream.shutdown();
        }
    }

    fn report_stats(&mut self) {
        let (read, written) = (self.reader.stats().bytes, self.writer.stats().bytes);
        let (last_read, last_written, since) = self.last_report;
        let secs = since.elapsed().as_secs_f64().max(1e-3);
        let mb = |bytes: u64| bytes as f64 / (1024.0 * 1024.0 * secs);
        log::debug!(
            "[gateway] {} {:.1}s since last report: read {} bytes ({:.3} MB/s), wrote {} bytes ({:.3} MB/s)",
            self.address,
            secs,
            read - last_read,
            mb(read - last_read),
            written - last_written,
            mb(written - last_written)
        );
        self.last_report = (read, written, Instant::now());
    }
}

impl WorkProcess for GatewayWp {
    fn class(&self) -> AtomicId {
        AID_GATEWAY_WP
    }

    fn init(&mut self, ctx: &mut WpContext<'_>) {
        self.address = ctx.address();
        ctx.subscribe(Hiid::from(AID_SUBSCRIBE).with(AtomicId::WILDCARD), Scope::Local);
        ctx.subscribe(Hiid::from(AID_BYE).with(AtomicId::WILDCARD), Scope::Local);
    }

    fn start(&mut self, ctx: &mut WpContext<'_>) -> bool {
        let local: Vec<(MsgAddress, Subscriptions)> = ctx
            .attached()
            .filter(|(addr, _)| addr.wpclass != AID_GATEWAY_WP)
            .map(|(addr, subs)| (*addr, subs.clone()))
            .collect();
        let block = handshake::pack(local.iter().map(|(a, s)| (a, s)));
        log::debug!(
            "[gateway] {} handshake with {} local work processes ({} bytes)",
            self.address,
            local.len(),
            block.len()
        );
        let mut hello = Message::new(AID_SUBSCRIPTIONS).with_data(block);
        match ctx.peers().to_bytes() {
            Ok(peers) => hello = hello.with_payload(Record::new().with(AID_PEERS, peers)),
            Err(e) => log::warn!("[gateway] {} cannot pack peer list: {}", self.address, e),
        }
        hello.from = self.address;
        hello.to = MsgAddress::any();
        self.enqueue(&hello, ctx);

        ctx.add_timeout(self.config.init_timeout, AID_INIT, TimerMode::OneShot);
        ctx.add_timeout(self.config.heartbeat_interval, AID_HEARTBEAT, TimerMode::Continuous);
        self.last_report = (0, 0, Instant::now());

        if let Err(e) = self.stream.set_nodelay(self.config.tcp_nodelay) {
            log::debug!("[gateway] {} TCP_NODELAY: {}", self.address, e);
        }
        match ctx.add_input(&mut self.stream, InputFlags::READ | InputFlags::WRITE) {
            Ok(input) => self.input = Some(input),
            Err(e) => {
                log::error!("[gateway] {} cannot watch socket: {}", self.address, e);
                self.shutdown(ctx);
                return false;
            }
        }
        self.flush(ctx);
        false
    }

    fn stop(&mut self, ctx: &mut WpContext<'_>) {
        if self.state == PeerState::Connected {
            if let Some(peer_id) = self.peer_id() {
                ctx.peers_mut().remove(&peer_id, &self.address);
            }
        }
        self.state = PeerState::Closing;
        self.release_socket(ctx);
        self.pending = None;
    }

    fn receive(&mut self, msg: &MessageRef, ctx: &mut WpContext<'_>) -> Delivery {
        let up_notice = Hiid::from([AID_GW, AID_REMOTE, AID_UP, AtomicId::WILDCARD]);
        if msg.from.wpclass == AID_GATEWAY_WP && !up_notice.matches(&msg.id) {
            return Delivery::Accept;
        }
        match self.state {
            PeerState::Initializing => return Delivery::Hold,
            PeerState::Closing => return Delivery::Accept,
            PeerState::Connected => {}
        }
        if let Some((process, host)) = self.remote {
            if !process.matches(msg.to.process) || !host.matches(msg.to.host) {
                return Delivery::Accept;
            }
        }

        if !self.writer.is_idle() {
            if self.pending.is_some() {
                return Delivery::Hold;
            }
            self.pending = Some(MessageRef::clone(msg));
            return Delivery::Accept;
        }
        if self.enqueue(msg, ctx) {
            self.flush(ctx);
        }
        Delivery::Accept
    }

    fn timeout(&mut self, id: &Hiid, ctx: &mut WpContext<'_>) -> Delivery {
        if *id == Hiid::from(AID_INIT) {
            if self.state == PeerState::Initializing {
                log::error!("[gateway] {} timed out waiting for the peer handshake", self.address);
                self.shutdown(ctx);
            }
            return Delivery::Cancel;
        }
        if *id == Hiid::from(AID_HEARTBEAT) {
            if !self.writer.is_idle() && self.writer.last_progress().elapsed() >= self.config.write_timeout {
                log::error!("[gateway] {} write stalled, aborting", self.address);
                self.shutdown(ctx);
                return Delivery::Cancel;
            }
            if self.state == PeerState::Connected
                && self.pending.is_none()
                && self.writer.queue_control(PacketType::Ping)
            {
                self.flush(ctx);
            }
            if self.ticks % STATS_EVERY == 0 {
                self.report_stats();
            }
            self.ticks += 1;
        }
        Delivery::Accept
    }

    fn input(&mut self, _input: InputId, flags: InputFlags, ctx: &mut WpContext<'_>) -> Delivery {
        if self.input.is_none() {
            return Delivery::Cancel;
        }
        if flags.contains(InputFlags::EXCEPTION) {
            if let Ok(Some(e)) = self.stream.take_error() {
                log::error!("[gateway] {} socket error: {}", self.address, e);
                self.shutdown(ctx);
                return Delivery::Cancel;
            }
        }
        if flags.contains(InputFlags::WRITE) {
            self.flush(ctx);
        }
        if flags.contains(InputFlags::READ) && self.state != PeerState::Closing {
            self.read_socket(ctx);
        }
        if self.input.is_none() {
            Delivery::Cancel
        } else {
            Delivery::Accept
        }
    }

    fn will_forward(&self, msg: &Message) -> bool {
        if self.state != PeerState::Connected {
            return false;
        }
        if server_open_pattern().matches(&msg.id) {
            if msg.forwarder == self.address || msg.hops > MAX_ANNOUNCE_HOPS {
                return false;
            }
        } else if msg.hops > 0 {
            return false;
        }
        let Some((process, host)) = self.remote else {
            return false;
        };
        if !process.matches(msg.to.process) || !host.matches(msg.to.host) {
            return false;
        }
        if msg.to.is_publish() {
            self.remote_subs.values().any(|subs| subs.matches(msg))
        } else {
            self.remote_subs.keys().any(|addr| addr.matches(&msg.to))
        }
    }
}

impl std::fmt::Debug for GatewayWp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayWp")
            .field("address", &self.address)
            .field("stream", &self.stream)
            .field("state", &self.state)
            .field("remote_wps", &self.remote_subs.len())
            .finish()
    }
}
