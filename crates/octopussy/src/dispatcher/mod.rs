// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-threaded dispatcher: work process registry, router and event loop.
//!
//! # Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |                         Dispatcher                            |
//! |                                                               |
//! |  DispatcherHandle --> CommandQueue --+                        |
//! |  (other threads)      (mutex+condvar)|  Waker                 |
//! |                                      v                        |
//! |  +---------------------------------------------------------+  |
//! |  |                      mio::Poll                          |  |
//! |  |   socket inputs (gateways, listeners)   + timer heap    |  |
//! |  +---------------------------------------------------------+  |
//! |        | input()          | timeout()        | signal()     |
//! |        v                  v                  v              |
//! |  +---------------------------------------------------------+  |
//! |  |  slots (attach order): address, subscriptions, queue    |  |
//! |  +---------------------------------------------------------+  |
//! |        ^ route(): subscribers + forwarders (gateways)         |
//! +---------------------------------------------------------------+
//! ```
//!
//! Work process callbacks run with the process temporarily taken out of its
//! slot, so a callback can use its [`WpContext`] freely. Messages emitted
//! from inside callbacks are routed once the outermost callback returns.

mod command;
pub(crate) mod signals;
mod thread;
mod timer;

pub use command::DispatcherHandle;
pub use thread::DispatcherThread;

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::{Events, Poll, Token, Waker};

use self::command::{Command, CommandQueue};
use self::signals::SignalTable;
use self::timer::TimerQueue;
use crate::address::{MsgAddress, Scope};
use crate::aid::{AtomicId, AID_BYE, AID_GATEWAY_WP, AID_HELLO, AID_SUBSCRIBE};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::gateway::peers::PeerList;
use crate::hiid::Hiid;
use crate::message::{Message, MessageRef};
use crate::subscriptions::Subscriptions;
use crate::wp::{Delivery, InputFlags, InputId, SignalMode, TimerId, TimerMode, WorkProcess, WpContext};

// ============================================================================
// Constants
// ============================================================================

/// Token for the cross-thread waker.
const WAKER_TOKEN: Token = Token(0);

/// First token handed out to work process inputs.
const INPUT_TOKEN_START: usize = 1;

/// Maximum events to process per poll.
const MAX_EVENTS: usize = 128;

/// Poll interval while some message is held by its recipient.
const HOLD_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Poll interval while signals are registered (a signal may hit another thread).
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bound on back-to-back delivery passes within one loop iteration.
const MAX_DELIVERY_PASSES: usize = 64;

// ============================================================================
// Slots
// ============================================================================

/// Stable identifier of an attached work process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WpKey(pub(crate) u64);

/// Lifecycle state of an attached work process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WpState {
    Initialized,
    Running,
    Stopped,
}

/// Queued delivery: higher priority first, then FIFO.
struct Queued {
    priority: i32,
    seq: u64,
    msg: MessageRef,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Slot {
    key: WpKey,
    address: MsgAddress,
    subs: Subscriptions,
    wp: Option<Box<dyn WorkProcess>>,
    state: WpState,
    queue: BinaryHeap<Queued>,
    detaching: bool,
}

enum Deferred {
    Route(MessageRef),
    DeclareForwarder(WpKey),
}

/// Routing and delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Messages passed to the router.
    pub routed: u64,
    /// Messages accepted (or cancelled) by a recipient.
    pub delivered: u64,
    /// HOLD results returned by recipients.
    pub held: u64,
    /// Messages that matched no recipient.
    pub unrouted: u64,
    /// Callbacks that panicked.
    pub panics: u64,
}

// ============================================================================
// Core (state reachable from WpContext)
// ============================================================================

pub(crate) struct Core {
    ctx: Context,
    poll: Poll,
    slots: Vec<Slot>,
    next_key: u64,
    class_index: HashMap<AtomicId, i32>,
    timers: TimerQueue,
    inputs: HashMap<Token, WpKey>,
    next_token: usize,
    signals: SignalTable,
    forwarders: Vec<WpKey>,
    peers: PeerList,
    deferred: VecDeque<Deferred>,
    depth: u32,
    detach_requests: Vec<WpKey>,
    running: bool,
    stop_requested: bool,
    repoll: bool,
    seq: u64,
    stats: DispatcherStats,
}

impl Core {
    fn new(ctx: Context, poll: Poll) -> Self {
        Self {
            ctx,
            poll,
            slots: Vec::new(),
            next_key: 1,
            class_index: HashMap::new(),
            timers: TimerQueue::new(),
            inputs: HashMap::new(),
            next_token: INPUT_TOKEN_START,
            signals: SignalTable::new(),
            forwarders: Vec::new(),
            peers: PeerList::new(),
            deferred: VecDeque::new(),
            depth: 0,
            detach_requests: Vec::new(),
            running: false,
            stop_requested: false,
            repoll: false,
            seq: 0,
            stats: DispatcherStats::default(),
        }
    }

    pub(crate) fn context(&self) -> &Context {
        &self.ctx
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    fn index_of(&self, key: WpKey) -> Option<usize> {
        self.slots.iter().position(|s| s.key == key)
    }

    fn label(&self, key: WpKey) -> String {
        match self.index_of(key) {
            Some(i) => self.slots[i].address.display(self.ctx.registry()),
            None => format!("<detached #{}>", key.0),
        }
    }

    pub(crate) fn address_of(&self, key: WpKey) -> Option<MsgAddress> {
        self.index_of(key).map(|i| self.slots[i].address)
    }

    pub(crate) fn subscriptions_of(&self, key: WpKey) -> Option<&Subscriptions> {
        self.index_of(key).map(|i| &self.slots[i].subs)
    }

    pub(crate) fn attached(&self) -> impl Iterator<Item = (&MsgAddress, &Subscriptions)> + '_ {
        self.slots
            .iter()
            .filter(|s| !s.detaching)
            .map(|s| (&s.address, &s.subs))
    }

    pub(crate) fn peers(&self) -> &PeerList {
        &self.peers
    }

    pub(crate) fn peers_mut(&mut self) -> &mut PeerList {
        &mut self.peers
    }

    pub(crate) fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    // ------------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------------

    /// Run `f` on the work process `key` with a context borrowing this core.
    /// Returns `fallback` if the process is gone or the callback panicked.
    fn with_wp<R>(
        &mut self,
        key: WpKey,
        fallback: R,
        f: impl FnOnce(&mut dyn WorkProcess, &mut WpContext<'_>) -> R,
    ) -> R {
        let Some(idx) = self.index_of(key) else {
            return fallback;
        };
        let Some(mut wp) = self.slots[idx].wp.take() else {
            return fallback;
        };

        self.depth += 1;
        let result = {
            let mut ctx = WpContext {
                core: &mut *self,
                key,
            };
            panic::catch_unwind(AssertUnwindSafe(|| f(&mut *wp, &mut ctx)))
        };
        self.depth -= 1;

        if let Some(idx) = self.index_of(key) {
            self.slots[idx].wp = Some(wp);
        }
        if self.depth == 0 {
            self.flush_deferred();
        }

        match result {
            Ok(r) => r,
            Err(_) => {
                self.stats.panics += 1;
                log::error!(
                    "[dispatcher] work process {} panicked in a callback",
                    self.label(key)
                );
                fallback
            }
        }
    }

    fn flush_deferred(&mut self) {
        while let Some(item) = self.deferred.pop_front() {
            match item {
                Deferred::Route(msg) => self.route(msg),
                Deferred::DeclareForwarder(key) => self.add_forwarder(key),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    pub(crate) fn attach(&mut self, wp: Box<dyn WorkProcess>) -> MsgAddress {
        let class = wp.class();
        let index = self.class_index.entry(class).or_insert(0);
        *index += 1;
        let address = MsgAddress::new(class, AtomicId::new(*index), self.ctx.process(), self.ctx.host());

        let key = WpKey(self.next_key);
        self.next_key += 1;
        self.slots.push(Slot {
            key,
            address,
            subs: Subscriptions::new(),
            wp: Some(wp),
            state: WpState::Initialized,
            queue: BinaryHeap::new(),
            detaching: false,
        });
        log::debug!("[dispatcher] attached {}", address.display(self.ctx.registry()));

        self.with_wp(key, (), |wp, ctx| wp.init(ctx));
        if self.running {
            self.start_wp(key);
        }
        address
    }

    fn start_wp(&mut self, key: WpKey) {
        let again = self.with_wp(key, false, |wp, ctx| wp.start(ctx));
        let Some(idx) = self.index_of(key) else {
            return;
        };
        let slot = &mut self.slots[idx];
        if slot.state != WpState::Initialized {
            return;
        }
        slot.state = WpState::Running;
        if again {
            self.repoll = true;
        }
        let address = slot.address;
        if announces(&address) {
            let subs = slot.subs.clone();
            self.announce(address, AID_HELLO, None);
            self.announce(address, AID_SUBSCRIBE, Some(&subs));
        }
    }

    pub(crate) fn request_detach(&mut self, key: WpKey) {
        if let Some(idx) = self.index_of(key) {
            if !self.slots[idx].detaching {
                self.slots[idx].detaching = true;
                self.detach_requests.push(key);
            }
        }
    }

    fn process_detaches(&mut self) {
        while !self.detach_requests.is_empty() {
            let requests = std::mem::take(&mut self.detach_requests);
            for key in requests {
                let Some(idx) = self.index_of(key) else {
                    continue;
                };
                let was = self.slots[idx].state;
                if was != WpState::Stopped {
                    self.with_wp(key, (), |wp, ctx| wp.stop(ctx));
                }
                let Some(idx) = self.index_of(key) else {
                    continue;
                };
                let slot = self.slots.remove(idx);
                self.forwarders.retain(|k| *k != key);
                self.inputs.retain(|_, owner| *owner != key);
                self.timers.remove_owner(key);
                self.signals.remove_owner(key);
                if was == WpState::Running && announces(&slot.address) {
                    self.announce(slot.address, AID_BYE, None);
                }
                log::debug!(
                    "[dispatcher] detached {} ({} queued messages dropped)",
                    slot.address.display(self.ctx.registry()),
                    slot.queue.len()
                );
            }
        }
    }

    fn add_forwarder(&mut self, key: WpKey) {
        if self.index_of(key).is_some() && !self.forwarders.contains(&key) {
            log::debug!("[dispatcher] {} declared as forwarder", self.label(key));
            self.forwarders.push(key);
        }
    }

    pub(crate) fn declare_forwarder(&mut self, key: WpKey) {
        if self.depth == 0 {
            self.add_forwarder(key);
        } else {
            self.deferred.push_back(Deferred::DeclareForwarder(key));
        }
    }

    // ------------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------------

    pub(crate) fn subscribe(&mut self, key: WpKey, mask: Hiid, scope: Scope) {
        let pattern = self.ctx.scope_pattern(scope);
        if let Some(idx) = self.index_of(key) {
            if self.slots[idx].subs.add(mask, pattern) {
                self.subscriptions_changed(idx);
            }
        }
    }

    pub(crate) fn unsubscribe(&mut self, key: WpKey, mask: &Hiid) {
        if let Some(idx) = self.index_of(key) {
            if self.slots[idx].subs.remove(mask) {
                self.subscriptions_changed(idx);
            }
        }
    }

    fn subscriptions_changed(&mut self, idx: usize) {
        let slot = &self.slots[idx];
        if slot.state == WpState::Running && !slot.detaching && announces(&slot.address) {
            let (address, subs) = (slot.address, slot.subs.clone());
            self.announce(address, AID_SUBSCRIBE, Some(&subs));
        }
    }

    /// Publish `<what>.<address>` globally on behalf of `address`.
    fn announce(&mut self, address: MsgAddress, what: AtomicId, subs: Option<&Subscriptions>) {
        let mut msg = Message::new(Hiid::from(what).concat(&address.to_hiid()));
        msg.from = address;
        msg.to = self.ctx.publish_address(Scope::Global);
        if let Some(subs) = subs {
            msg.data = Some(subs.to_bytes());
        }
        self.emit(msg.into_ref());
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    pub(crate) fn emit(&mut self, msg: MessageRef) {
        if self.depth == 0 {
            self.route(msg);
        } else {
            self.deferred.push_back(Deferred::Route(msg));
        }
    }

    fn route(&mut self, msg: MessageRef) {
        self.stats.routed += 1;
        let to = msg.to;
        let mut recipients: Vec<usize> = Vec::new();

        if self.ctx.covers(&to) {
            for (i, slot) in self.slots.iter().enumerate() {
                if slot.detaching || slot.state == WpState::Stopped {
                    continue;
                }
                let hit = if to.is_publish() {
                    slot.subs.matches(&msg)
                } else {
                    to.matches(&slot.address)
                };
                if hit {
                    recipients.push(i);
                }
            }
        }

        if !self.ctx.is_exactly_local(&to) && (to.is_publish() || recipients.is_empty()) {
            for fkey in &self.forwarders {
                let Some(i) = self.slots.iter().position(|s| s.key == *fkey) else {
                    continue;
                };
                if recipients.contains(&i) {
                    continue;
                }
                let slot = &self.slots[i];
                if slot.detaching || slot.state != WpState::Running {
                    continue;
                }
                let Some(wp) = slot.wp.as_deref() else {
                    continue;
                };
                let wants = panic::catch_unwind(AssertUnwindSafe(|| wp.will_forward(&msg)))
                    .unwrap_or_else(|_| {
                        log::error!("[dispatcher] will_forward panicked in {}", slot.address);
                        false
                    });
                if wants {
                    recipients.push(i);
                }
            }
        }

        if recipients.is_empty() {
            self.stats.unrouted += 1;
            log::trace!(
                "[dispatcher] no recipients for {} -> {}",
                self.ctx.registry().display(&msg.id),
                to
            );
            return;
        }

        for i in recipients {
            self.seq += 1;
            self.slots[i].queue.push(Queued {
                priority: msg.priority,
                seq: self.seq,
                msg: Arc::clone(&msg),
            });
        }
    }

    /// Deliver queued messages until no recipient makes progress.
    fn deliver_pending(&mut self) -> bool {
        let mut delivered_any = false;
        for _ in 0..MAX_DELIVERY_PASSES {
            let mut progress = false;
            let keys: Vec<WpKey> = self
                .slots
                .iter()
                .filter(|s| s.state == WpState::Running && !s.detaching && !s.queue.is_empty())
                .map(|s| s.key)
                .collect();

            for key in keys {
                loop {
                    let Some(idx) = self.index_of(key) else {
                        break;
                    };
                    let slot = &mut self.slots[idx];
                    if slot.detaching || slot.state != WpState::Running || slot.wp.is_none() {
                        break;
                    }
                    let Some(item) = slot.queue.pop() else {
                        break;
                    };
                    let msg = Arc::clone(&item.msg);
                    let outcome = self.with_wp(key, Delivery::Accept, |wp, ctx| wp.receive(&msg, ctx));
                    if outcome == Delivery::Hold {
                        self.stats.held += 1;
                        if let Some(idx) = self.index_of(key) {
                            self.slots[idx].queue.push(item);
                        }
                        break;
                    }
                    self.stats.delivered += 1;
                    progress = true;
                }
            }

            self.process_detaches();
            if !progress {
                break;
            }
            delivered_any = true;
        }
        delivered_any
    }

    fn has_backlog(&self) -> bool {
        self.slots
            .iter()
            .any(|s| s.state == WpState::Running && !s.detaching && !s.queue.is_empty())
    }

    // ------------------------------------------------------------------------
    // Event sources
    // ------------------------------------------------------------------------

    pub(crate) fn add_timeout(&mut self, owner: WpKey, period: Duration, id: Hiid, mode: TimerMode) -> TimerId {
        self.timers.add(owner, id, period, mode, Instant::now())
    }

    pub(crate) fn remove_timeout(&mut self, owner: WpKey, id: &Hiid) -> bool {
        self.timers.remove(owner, id)
    }

    pub(crate) fn add_input<S>(&mut self, owner: WpKey, source: &mut S, flags: InputFlags) -> io::Result<InputId>
    where
        S: Source + ?Sized,
    {
        let interest = flags.interest().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "input needs READ or WRITE interest")
        })?;
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll.registry().register(source, token, interest)?;
        self.inputs.insert(token, owner);
        Ok(InputId(token))
    }

    pub(crate) fn modify_input<S>(&mut self, source: &mut S, input: InputId, flags: InputFlags) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        if !self.inputs.contains_key(&input.0) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "input is not registered"));
        }
        let interest = flags.interest().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "input needs READ or WRITE interest")
        })?;
        self.poll.registry().reregister(source, input.0, interest)
    }

    pub(crate) fn remove_input<S>(&mut self, source: &mut S, input: InputId) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.inputs.remove(&input.0);
        self.poll.registry().deregister(source)
    }

    pub(crate) fn add_signal(&mut self, owner: WpKey, signum: i32, mode: SignalMode) -> io::Result<()> {
        self.signals.add(owner, signum, mode)
    }

    fn dispatch_input(&mut self, token: Token, flags: InputFlags) {
        let Some(&owner) = self.inputs.get(&token) else {
            return;
        };
        let outcome = self.with_wp(owner, Delivery::Accept, |wp, ctx| wp.input(InputId(token), flags, ctx));
        if outcome == Delivery::Cancel {
            self.inputs.remove(&token);
        }
    }

    fn fire_timers(&mut self, now: Instant) {
        for (tid, entry) in self.timers.pop_due(now) {
            match self.index_of(entry.owner) {
                Some(i) if self.slots[i].state == WpState::Running && !self.slots[i].detaching => {}
                _ => continue,
            }
            let outcome = self.with_wp(entry.owner, Delivery::Accept, |wp, ctx| wp.timeout(&entry.id, ctx));
            if outcome == Delivery::Cancel {
                self.timers.cancel(tid);
            }
        }
    }

    fn dispatch_signals(&mut self) {
        for (signum, owners) in self.signals.collect() {
            log::debug!("[dispatcher] signal {} received", signum);
            for owner in owners {
                self.with_wp(owner, (), |wp, ctx| wp.signal(signum, ctx));
            }
        }
    }

    fn poll_timeout(&mut self, max_wait: Option<Duration>) -> Option<Duration> {
        if self.repoll || self.stop_requested {
            return Some(Duration::ZERO);
        }
        let mut timeout = max_wait;
        if let Some(deadline) = self.timers.next_deadline() {
            timeout = min_timeout(timeout, deadline.saturating_duration_since(Instant::now()));
        }
        if self.has_backlog() {
            timeout = min_timeout(timeout, HOLD_RETRY_INTERVAL);
        }
        if self.signals.is_active() {
            timeout = min_timeout(timeout, SIGNAL_POLL_INTERVAL);
        }
        timeout
    }
}

fn min_timeout(current: Option<Duration>, cap: Duration) -> Option<Duration> {
    Some(current.map_or(cap, |t| t.min(cap)))
}

/// Gateways are plumbing: their lifecycle is not announced to peers.
fn announces(address: &MsgAddress) -> bool {
    address.wpclass != AID_GATEWAY_WP
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Event loop hosting a set of work processes.
pub struct Dispatcher {
    core: Core,
    events: Events,
    commands: Arc<CommandQueue>,
    waker: Arc<Waker>,
}

impl Dispatcher {
    pub fn new(ctx: Context) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        log::debug!(
            "[dispatcher] created for process {} host {}",
            ctx.process(),
            ctx.host()
        );
        Ok(Self {
            core: Core::new(ctx, poll),
            events: Events::with_capacity(MAX_EVENTS),
            commands: Arc::new(CommandQueue::new()),
            waker,
        })
    }

    pub fn context(&self) -> &Context {
        &self.core.ctx
    }

    /// Address of the dispatcher itself (sender of [`Dispatcher::publish`]).
    pub fn address(&self) -> MsgAddress {
        self.core.ctx.dispatcher_address()
    }

    pub fn is_running(&self) -> bool {
        self.core.running
    }

    pub fn stats(&self) -> DispatcherStats {
        self.core.stats
    }

    /// Handle for other threads.
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle::new(Arc::clone(&self.commands), Arc::clone(&self.waker))
    }

    /// Attach a work process. It is initialized at once, and started at once
    /// if the dispatcher is running.
    pub fn attach(&mut self, wp: Box<dyn WorkProcess>) -> MsgAddress {
        self.core.attach(wp)
    }

    /// Stop and remove the work process at `address`.
    pub fn detach(&mut self, address: &MsgAddress) -> Result<()> {
        let key = self.key_of(address).ok_or(Error::WpNotFound)?;
        self.core.request_detach(key);
        self.core.process_detaches();
        Ok(())
    }

    /// Make the work process at `address` a forwarder.
    pub fn declare_forwarder(&mut self, address: &MsgAddress) -> Result<()> {
        let key = self.key_of(address).ok_or(Error::WpNotFound)?;
        self.core.declare_forwarder(key);
        Ok(())
    }

    /// Send `msg` to `to` with the dispatcher as sender.
    pub fn send(&mut self, mut msg: Message, to: MsgAddress) {
        msg.from = self.address();
        msg.to = to;
        self.core.emit(msg.into_ref());
    }

    /// Publish `msg` to `scope` with the dispatcher as sender.
    pub fn publish(&mut self, mut msg: Message, scope: Scope) {
        msg.from = self.address();
        msg.to = self.core.ctx.publish_address(scope);
        self.core.emit(msg.into_ref());
    }

    /// Route an already addressed message unchanged.
    pub fn forward(&mut self, msg: MessageRef) {
        self.core.emit(msg);
    }

    /// Start every attached work process, in attach order.
    pub fn start(&mut self) -> Result<()> {
        if self.core.running {
            return Ok(());
        }
        self.core.running = true;
        self.core.stop_requested = false;
        let keys: Vec<WpKey> = self
            .core
            .slots
            .iter()
            .filter(|s| s.state == WpState::Initialized)
            .map(|s| s.key)
            .collect();
        for key in keys {
            self.core.start_wp(key);
        }
        self.core.process_detaches();
        log::info!(
            "[dispatcher] started {} work processes",
            self.core.slots.len()
        );
        Ok(())
    }

    /// Stop every work process in reverse attach order.
    pub fn stop(&mut self) {
        if !self.core.running {
            return;
        }
        let keys: Vec<WpKey> = self.core.slots.iter().rev().map(|s| s.key).collect();
        for key in keys {
            let running = self
                .core
                .index_of(key)
                .is_some_and(|i| self.core.slots[i].state == WpState::Running);
            if running {
                self.core.with_wp(key, (), |wp, ctx| wp.stop(ctx));
                if let Some(i) = self.core.index_of(key) {
                    self.core.slots[i].state = WpState::Stopped;
                }
            }
        }
        self.core.running = false;
        self.core.process_detaches();
        log::info!("[dispatcher] stopped");
    }

    /// Run one loop iteration, waiting at most `max_wait` for events
    /// (`None` waits until the next timer or event).
    pub fn poll_once(&mut self, max_wait: Option<Duration>) -> Result<()> {
        if !self.core.running {
            return Err(Error::NotRunning);
        }
        self.run_commands();
        self.core.deliver_pending();

        let timeout = self.core.poll_timeout(max_wait);
        self.core.repoll = false;
        if let Err(e) = self.core.poll.poll(&mut self.events, timeout) {
            if e.kind() != io::ErrorKind::Interrupted {
                return Err(e.into());
            }
        }

        let ready: Vec<(Token, InputFlags)> = self
            .events
            .iter()
            .filter(|e| e.token() != WAKER_TOKEN)
            .map(|e| (e.token(), InputFlags::from_event(e)))
            .collect();
        for (token, flags) in ready {
            self.core.dispatch_input(token, flags);
        }

        self.core.fire_timers(Instant::now());
        self.core.dispatch_signals();
        self.run_commands();
        self.core.deliver_pending();
        self.core.process_detaches();
        Ok(())
    }

    /// Run until [`Dispatcher::request_stop`], a [`DispatcherHandle::stop`]
    /// or a work process asks to stop; then stop all work processes.
    pub fn poll_loop(&mut self) -> Result<()> {
        self.start()?;
        while !self.core.stop_requested {
            self.poll_once(None)?;
        }
        self.stop();
        Ok(())
    }

    /// Make [`Dispatcher::poll_loop`] return after the current iteration.
    pub fn request_stop(&mut self) {
        self.core.request_stop();
    }

    fn run_commands(&mut self) {
        let (commands, upto) = self.commands.drain();
        for cmd in commands {
            match cmd {
                Command::Send { msg, to } => self.send(msg, to),
                Command::Publish { msg, scope } => self.publish(msg, scope),
                Command::Attach(wp) => {
                    self.attach(wp);
                }
                Command::Stop => self.core.request_stop(),
            }
        }
        self.commands.mark_enacted(upto);
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    fn key_of(&self, address: &MsgAddress) -> Option<WpKey> {
        self.core
            .slots
            .iter()
            .find(|s| s.address == *address)
            .map(|s| s.key)
    }

    /// Addresses of attached work processes, in attach order.
    pub fn addresses(&self) -> Vec<MsgAddress> {
        self.core.slots.iter().map(|s| s.address).collect()
    }

    pub fn state_of(&self, address: &MsgAddress) -> Option<WpState> {
        self.core
            .slots
            .iter()
            .find(|s| s.address == *address)
            .map(|s| s.state)
    }

    pub fn subscriptions_of(&self, address: &MsgAddress) -> Option<&Subscriptions> {
        self.core
            .slots
            .iter()
            .find(|s| s.address == *address)
            .map(|s| &s.subs)
    }

    /// Borrow the work process at `address` as its concrete type.
    pub fn wp<T: WorkProcess>(&self, address: &MsgAddress) -> Option<&T> {
        self.core
            .slots
            .iter()
            .find(|s| s.address == *address)
            .and_then(|s| s.wp.as_deref())
            .and_then(|wp| wp.as_any().downcast_ref::<T>())
    }

    pub fn wp_mut<T: WorkProcess>(&mut self, address: &MsgAddress) -> Option<&mut T> {
        self.core
            .slots
            .iter_mut()
            .find(|s| s.address == *address)
            .and_then(|s| s.wp.as_deref_mut())
            .and_then(|wp| wp.as_any_mut().downcast_mut::<T>())
    }

    /// Addresses of the current forwarders.
    pub fn forwarders(&self) -> Vec<MsgAddress> {
        self.core
            .forwarders
            .iter()
            .filter_map(|k| self.core.address_of(*k))
            .collect()
    }

    pub fn peers(&self) -> &PeerList {
        &self.core.peers
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.commands.close();
        self.stop();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("address", &self.address())
            .field("wps", &self.core.slots.len())
            .field("running", &self.core.running)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aid::AidRegistry;
    use parking_lot::Mutex;

    const CLASS: AtomicId = AtomicId::new(-5001);
    const TOPIC: AtomicId = AtomicId::new(-5002);

    fn dispatcher() -> Dispatcher {
        let ctx = Context::with_identity(
            Arc::new(AidRegistry::standard()),
            AtomicId::new(1),
            AtomicId::new(2),
        );
        Dispatcher::new(ctx).unwrap()
    }

    #[derive(Default)]
    struct Probe {
        log: Arc<Mutex<Vec<String>>>,
        hold_first: bool,
        held: bool,
    }

    impl WorkProcess for Probe {
        fn class(&self) -> AtomicId {
            CLASS
        }

        fn init(&mut self, ctx: &mut WpContext<'_>) {
            ctx.subscribe(Hiid::from(TOPIC).with(AtomicId::WILDCARD), Scope::Local);
            self.log.lock().push("init".into());
        }

        fn start(&mut self, _ctx: &mut WpContext<'_>) -> bool {
            self.log.lock().push("start".into());
            false
        }

        fn stop(&mut self, _ctx: &mut WpContext<'_>) {
            self.log.lock().push("stop".into());
        }

        fn receive(&mut self, msg: &MessageRef, _ctx: &mut WpContext<'_>) -> Delivery {
            if self.hold_first && !self.held {
                self.held = true;
                return Delivery::Hold;
            }
            self.log.lock().push(format!("recv {}", msg.id));
            Delivery::Accept
        }
    }

    #[test]
    fn test_lifecycle_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dsp = dispatcher();
        let addr = dsp.attach(Box::new(Probe {
            log: log.clone(),
            ..Default::default()
        }));
        assert_eq!(addr.wpindex, AtomicId::new(1));
        assert_eq!(dsp.state_of(&addr), Some(WpState::Initialized));
        dsp.start().unwrap();
        assert_eq!(dsp.state_of(&addr), Some(WpState::Running));
        dsp.stop();
        assert_eq!(dsp.state_of(&addr), Some(WpState::Stopped));
        assert_eq!(*log.lock(), vec!["init", "start", "stop"]);
    }

    #[test]
    fn test_hold_redelivers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dsp = dispatcher();
        dsp.attach(Box::new(Probe {
            log: log.clone(),
            hold_first: true,
            ..Default::default()
        }));
        dsp.start().unwrap();
        dsp.publish(Message::new([TOPIC, AtomicId::new(1)]), Scope::Local);
        dsp.poll_once(Some(Duration::ZERO)).unwrap();
        dsp.poll_once(Some(Duration::ZERO)).unwrap();
        let log = log.lock();
        assert_eq!(log.iter().filter(|l| l.starts_with("recv")).count(), 1);
        assert!(dsp.stats().held >= 1);
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        let m = Message::new(TOPIC).into_ref();
        for (priority, seq) in [(0, 1), (10, 2), (0, 3), (10, 4)] {
            heap.push(Queued {
                priority,
                seq,
                msg: m.clone(),
            });
        }
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|q| q.seq)).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_poll_requires_start() {
        let mut dsp = dispatcher();
        assert!(matches!(
            dsp.poll_once(Some(Duration::ZERO)),
            Err(Error::NotRunning)
        ));
    }

    #[test]
    fn test_detach_unknown_address() {
        let mut dsp = dispatcher();
        assert!(matches!(
            dsp.detach(&MsgAddress::any()),
            Err(Error::WpNotFound)
        ));
    }
}
