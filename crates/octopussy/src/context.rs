// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process identity and shared lookup tables.
//!
//! A [`Context`] is passed to every [`crate::Dispatcher`] at construction.
//! It replaces process-wide singletons: two dispatchers in one test binary
//! can carry different identities and still share a registry.

use std::sync::Arc;

use crate::address::{MsgAddress, Scope};
use crate::aid::{AidRegistry, AtomicId, AID_DISPATCHER};

/// Identity of one dispatcher plus the atomic id registry it resolves with.
#[derive(Debug, Clone)]
pub struct Context {
    registry: Arc<AidRegistry>,
    process: AtomicId,
    host: AtomicId,
    hostname: String,
}

impl Context {
    /// Identity of the running process: pid and `gethostid()`.
    pub fn local(registry: Arc<AidRegistry>) -> Self {
        let process = AtomicId::new(std::process::id() as i32 & i32::MAX);
        // SAFETY: gethostid has no preconditions and only reads system state.
        let hostid = unsafe { libc::gethostid() };
        let host = AtomicId::new((hostid as i64 & 0x7fff_ffff) as i32);
        Self {
            registry,
            process,
            host,
            hostname: local_hostname(),
        }
    }

    /// Explicit identity, used to run several simulated processes in one
    /// address space.
    pub fn with_identity(registry: Arc<AidRegistry>, process: AtomicId, host: AtomicId) -> Self {
        Self {
            registry,
            process,
            host,
            hostname: local_hostname(),
        }
    }

    /// Override the host name advertised by gateway servers.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn registry(&self) -> &AidRegistry {
        &self.registry
    }

    pub fn registry_arc(&self) -> Arc<AidRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn process(&self) -> AtomicId {
        self.process
    }

    pub fn host(&self) -> AtomicId {
        self.host
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Address of the dispatcher itself.
    pub fn dispatcher_address(&self) -> MsgAddress {
        MsgAddress::new(AID_DISPATCHER, AtomicId::NULL, self.process, self.host)
    }

    pub fn publish_address(&self, scope: Scope) -> MsgAddress {
        MsgAddress::publish(scope, self.process, self.host)
    }

    pub fn scope_pattern(&self, scope: Scope) -> MsgAddress {
        scope.pattern(self.process, self.host)
    }

    /// True if `(process, host)` of `addr` could refer to this dispatcher.
    pub fn covers(&self, addr: &MsgAddress) -> bool {
        addr.process.matches(self.process) && addr.host.matches(self.host)
    }

    /// True if `addr` names this dispatcher and nothing else.
    pub fn is_exactly_local(&self, addr: &MsgAddress) -> bool {
        addr.process == self.process && addr.host == self.host
    }
}

fn local_hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for buf.len() bytes; gethostname NUL-terminates on
    // success when the name fits.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_identity_non_negative() {
        let ctx = Context::local(Arc::new(AidRegistry::standard()));
        assert!(ctx.process().value() >= 0);
        assert!(ctx.host().value() >= 0);
        assert!(!ctx.hostname().is_empty());
    }

    #[test]
    fn test_covers() {
        let ctx = Context::with_identity(
            Arc::new(AidRegistry::standard()),
            AtomicId::new(10),
            AtomicId::new(20),
        );
        assert!(ctx.covers(&ctx.publish_address(Scope::Global)));
        assert!(ctx.covers(&ctx.publish_address(Scope::Local)));
        assert!(ctx.is_exactly_local(&ctx.publish_address(Scope::Local)));
        assert!(!ctx.is_exactly_local(&ctx.publish_address(Scope::Host)));
        let other = MsgAddress::new(AID_DISPATCHER, AtomicId::NULL, 11.into(), 20.into());
        assert!(!ctx.covers(&other));
    }
}
