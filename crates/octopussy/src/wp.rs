// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Work processes: the actors hosted by a [`crate::Dispatcher`].
//!
//! A work process is a plain struct implementing [`WorkProcess`]. Every
//! callback receives a [`WpContext`] through which it subscribes, sends,
//! arms timers and registers socket inputs. Callbacks must not block; a
//! handler that cannot take a message yet returns [`Delivery::Hold`] and the
//! dispatcher retries on a later loop iteration.
//!
//! # Lifecycle
//!
//! ```text
//! attach()      start()               stop() / detach()
//!    |             |                        |
//!    v             v                        v
//! Initialized -> Running --------------> Stopped
//!  (init())     (start())                (stop())
//! ```

use std::any::Any;
use std::fmt;
use std::io;
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

use mio::event::Source;
use mio::{Interest, Token};

use crate::address::{MsgAddress, Scope};
use crate::aid::{AidRegistry, AtomicId};
use crate::context::Context;
use crate::dispatcher::{Core, WpKey};
use crate::gateway::peers::PeerList;
use crate::hiid::Hiid;
use crate::message::{Message, MessageRef};
use crate::subscriptions::Subscriptions;

// ============================================================================
// Callback results and flags
// ============================================================================

/// Result of delivering an event to a work process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Event consumed.
    Accept,
    /// Not ready; keep the message queued and retry later.
    Hold,
    /// Disable the event source (timer or input) that produced this event.
    Cancel,
}

/// Readiness flags for socket inputs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InputFlags(u8);

impl InputFlags {
    pub const READ: InputFlags = InputFlags(0x01);
    pub const WRITE: InputFlags = InputFlags(0x02);
    pub const EXCEPTION: InputFlags = InputFlags(0x04);

    pub const fn empty() -> Self {
        InputFlags(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: InputFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: InputFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub(crate) fn interest(self) -> Option<Interest> {
        match (self.contains(Self::READ), self.contains(Self::WRITE)) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    pub(crate) fn from_event(event: &mio::event::Event) -> Self {
        let mut flags = Self::empty();
        if event.is_readable() || event.is_read_closed() {
            flags |= Self::READ;
        }
        if event.is_writable() || event.is_write_closed() {
            flags |= Self::WRITE;
        }
        if event.is_error() {
            flags |= Self::EXCEPTION;
        }
        flags
    }
}

impl BitOr for InputFlags {
    type Output = InputFlags;

    fn bitor(self, rhs: Self) -> Self {
        InputFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for InputFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for InputFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(Self::READ) {
            parts.push("READ");
        }
        if self.contains(Self::WRITE) {
            parts.push("WRITE");
        }
        if self.contains(Self::EXCEPTION) {
            parts.push("EXCEPTION");
        }
        write!(f, "InputFlags({})", parts.join("|"))
    }
}

/// Handle of a registered socket input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputId(pub(crate) Token);

/// Handle of an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

/// Whether a timer fires once or repeatedly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    OneShot,
    Continuous,
}

/// Disposition of a registered POSIX signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMode {
    /// Deliver to [`WorkProcess::signal`].
    Deliver,
    /// Install `SIG_IGN`.
    Ignore,
}

// ============================================================================
// Actor trait
// ============================================================================

/// Downcasting support for boxed work processes.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An actor hosted by a dispatcher.
///
/// Only [`WorkProcess::class`] is required; every callback has a no-op
/// default.
pub trait WorkProcess: AsAny + Send {
    /// Class component of this process's address.
    fn class(&self) -> AtomicId;

    /// Called once on attach. Subscribe here.
    fn init(&mut self, _ctx: &mut WpContext<'_>) {}

    /// Called when the dispatcher starts (or on attach to a running one).
    /// Returning true asks the dispatcher to poll again without waiting.
    fn start(&mut self, _ctx: &mut WpContext<'_>) -> bool {
        false
    }

    /// Called on dispatcher stop or before detach.
    fn stop(&mut self, _ctx: &mut WpContext<'_>) {}

    fn receive(&mut self, _msg: &MessageRef, _ctx: &mut WpContext<'_>) -> Delivery {
        Delivery::Accept
    }

    fn timeout(&mut self, _id: &Hiid, _ctx: &mut WpContext<'_>) -> Delivery {
        Delivery::Accept
    }

    fn input(&mut self, _input: InputId, _flags: InputFlags, _ctx: &mut WpContext<'_>) -> Delivery {
        Delivery::Accept
    }

    fn signal(&mut self, _signum: i32, _ctx: &mut WpContext<'_>) {}

    /// Forwarders only: whether this process wants `msg` for delivery
    /// elsewhere.
    fn will_forward(&self, _msg: &Message) -> bool {
        false
    }
}

// ============================================================================
// Callback context
// ============================================================================

/// Access to the dispatcher from inside a work process callback.
pub struct WpContext<'a> {
    pub(crate) core: &'a mut Core,
    pub(crate) key: WpKey,
}

impl<'a> WpContext<'a> {
    /// Address of the calling work process.
    pub fn address(&self) -> MsgAddress {
        self.core.address_of(self.key).unwrap_or_default()
    }

    pub fn context(&self) -> &Context {
        self.core.context()
    }

    pub fn registry(&self) -> &AidRegistry {
        self.core.context().registry()
    }

    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    // ------------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------------

    /// Subscribe to ids matching `mask` published within `scope`.
    pub fn subscribe(&mut self, mask: impl Into<Hiid>, scope: Scope) {
        self.core.subscribe(self.key, mask.into(), scope);
    }

    pub fn unsubscribe(&mut self, mask: &Hiid) {
        self.core.unsubscribe(self.key, mask);
    }

    pub fn subscriptions(&self) -> Option<&Subscriptions> {
        self.core.subscriptions_of(self.key)
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    /// Publish from this process's address to every subscriber in `scope`.
    pub fn publish(&mut self, mut msg: Message, scope: Scope) {
        msg.from = self.address();
        msg.to = self.core.context().publish_address(scope);
        self.core.emit(msg.into_ref());
    }

    /// Send directly to `to`.
    pub fn send(&mut self, mut msg: Message, to: MsgAddress) {
        msg.from = self.address();
        msg.to = to;
        self.core.emit(msg.into_ref());
    }

    /// Route `msg` unchanged: `from`, `to` and `hops` are kept.
    pub fn forward(&mut self, msg: MessageRef) {
        self.core.emit(msg);
    }

    // ------------------------------------------------------------------------
    // Event sources
    // ------------------------------------------------------------------------

    /// Arm a timer delivering `id` to [`WorkProcess::timeout`] after `period`.
    pub fn add_timeout(&mut self, period: Duration, id: impl Into<Hiid>, mode: TimerMode) -> TimerId {
        self.core.add_timeout(self.key, period, id.into(), mode)
    }

    /// Disarm every timer of this process with the given id.
    pub fn remove_timeout(&mut self, id: &Hiid) -> bool {
        self.core.remove_timeout(self.key, id)
    }

    /// Register `source` for readiness events delivered to
    /// [`WorkProcess::input`].
    pub fn add_input<S>(&mut self, source: &mut S, flags: InputFlags) -> io::Result<InputId>
    where
        S: Source + ?Sized,
    {
        self.core.add_input(self.key, source, flags)
    }

    /// Change the interest set of a registered input.
    pub fn modify_input<S>(&mut self, source: &mut S, input: InputId, flags: InputFlags) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.core.modify_input(source, input, flags)
    }

    pub fn remove_input<S>(&mut self, source: &mut S, input: InputId) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.core.remove_input(source, input)
    }

    pub fn add_signal(&mut self, signum: i32, mode: SignalMode) -> io::Result<()> {
        self.core.add_signal(self.key, signum, mode)
    }

    // ------------------------------------------------------------------------
    // Process management
    // ------------------------------------------------------------------------

    /// Attach another work process to the same dispatcher.
    pub fn attach(&mut self, wp: Box<dyn WorkProcess>) -> MsgAddress {
        self.core.attach(wp)
    }

    /// Detach the calling process once the current callback returns.
    pub fn detach(&mut self) {
        self.core.request_detach(self.key);
    }

    /// Offer this process non-local traffic via [`WorkProcess::will_forward`].
    pub fn declare_forwarder(&mut self) {
        self.core.declare_forwarder(self.key);
    }

    /// Ask the dispatcher loop to exit after the current iteration.
    pub fn stop_dispatcher(&mut self) {
        self.core.request_stop();
    }

    /// Addresses and subscriptions of every attached process, in attach order.
    pub fn attached(&self) -> impl Iterator<Item = (&MsgAddress, &Subscriptions)> + '_ {
        self.core.attached()
    }

    pub fn peers(&self) -> &PeerList {
        self.core.peers()
    }

    pub fn peers_mut(&mut self) -> &mut PeerList {
        self.core.peers_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_ops() {
        let rw = InputFlags::READ | InputFlags::WRITE;
        assert!(rw.contains(InputFlags::READ));
        assert!(rw.contains(InputFlags::WRITE));
        assert!(!rw.contains(InputFlags::EXCEPTION));
        assert!(rw.intersects(InputFlags::WRITE | InputFlags::EXCEPTION));
        assert!(InputFlags::empty().is_empty());
        assert_eq!(format!("{:?}", rw), "InputFlags(READ|WRITE)");
    }

    #[test]
    fn test_flags_interest() {
        assert_eq!(InputFlags::READ.interest(), Some(Interest::READABLE));
        assert_eq!(InputFlags::EXCEPTION.interest(), None);
        assert!(InputFlags::empty().interest().is_none());
    }
}
