// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Octopussy - actor dispatcher with socket gateways
//!
//! Work processes (actors) attach to a [`Dispatcher`], exchange [`Message`]s
//! addressed either directly or by publish/subscribe on hierarchical ids, and
//! react to timers, socket readiness and POSIX signals. Gateways link
//! dispatchers in different processes or on different hosts so that a
//! published message reaches every subscriber in scope, wherever it lives.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use octopussy::{AidRegistry, Context, Dispatcher, Message, Scope, WorkProcess, WpContext};
//! use octopussy::aid::{AtomicId, AID_HELLO};
//!
//! struct Greeter;
//!
//! impl WorkProcess for Greeter {
//!     fn class(&self) -> AtomicId {
//!         AtomicId::new(1)
//!     }
//!
//!     fn start(&mut self, ctx: &mut WpContext<'_>) -> bool {
//!         ctx.publish(Message::new(AID_HELLO), Scope::Global);
//!         false
//!     }
//! }
//!
//! fn main() -> octopussy::Result<()> {
//!     let ctx = Context::local(Arc::new(AidRegistry::standard()));
//!     let mut dsp = Dispatcher::new(ctx)?;
//!     dsp.attach(Box::new(Greeter));
//!     octopussy::gateway::init_gateways(&mut dsp, 0, "")?;
//!     dsp.start()?;
//!     dsp.poll_loop()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                       Work processes (actors)                       |
//! |   subscribe / publish / send | timers | inputs | signals            |
//! +---------------------------------------------------------------------+
//! |                            Dispatcher                               |
//! |   attach/detach | router (subscriptions + forwarders) | event loop  |
//! +---------------------------------------------------------------------+
//! |                             Gateways                                |
//! |   GwServerWp | GwClientWp | GatewayWp (framed packets over sockets) |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Dispatcher`] | Hosts work processes and runs the event loop |
//! | [`WorkProcess`] | Trait implemented by every actor |
//! | [`Message`] | Routed unit: id, addresses, payload record, raw data |
//! | [`Hiid`] | Hierarchical id used for message ids and subscription masks |
//! | [`MsgAddress`] | `(class, index, process, host)` address of a work process |
//!
//! ## Features
//!
//! - `checksum`: verify packet checksums on receive by default.

/// Hierarchical ids and publish scopes.
pub mod address;
/// Atomic ids and the name registry.
pub mod aid;
pub(crate) mod codec;
/// Process identity: registry, process and host ids.
pub mod context;
/// Event loop, router and cross-thread handle.
pub mod dispatcher;
pub mod error;
/// Gateways linking dispatchers over TCP and Unix sockets.
pub mod gateway;
pub mod hiid;
/// Messages and their block serialization.
pub mod message;
/// Typed field records carried as message payload.
pub mod record;
pub mod subscriptions;
/// Work process trait and callback context.
pub mod wp;

pub use address::{MsgAddress, Scope};
pub use aid::{AidRegistry, AtomicId};
pub use context::Context;
pub use dispatcher::{Dispatcher, DispatcherHandle, DispatcherStats, DispatcherThread, WpState};
pub use error::{Error, Result};
pub use hiid::Hiid;
pub use message::{Message, MessageRef};
pub use record::{Record, Value};
pub use subscriptions::Subscriptions;
pub use wp::{Delivery, InputFlags, InputId, SignalMode, TimerMode, WorkProcess, WpContext};
