// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message addresses and publish scopes.

use std::fmt;

use crate::aid::{AidRegistry, AtomicId, AID_PUBLISH};
use crate::codec::{put_i32, ByteReader};
use crate::error::Result;
use crate::hiid::Hiid;

/// Size of a packed [`MsgAddress`] in bytes.
pub const PACKED_ADDRESS_SIZE: usize = 16;

/// Address of a work process: `(class, index, process, host)`.
///
/// Any component may be [`AtomicId::WILDCARD`] when the address is used as a
/// pattern or as a publish destination.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MsgAddress {
    pub wpclass: AtomicId,
    pub wpindex: AtomicId,
    pub process: AtomicId,
    pub host: AtomicId,
}

impl MsgAddress {
    pub const fn new(
        wpclass: AtomicId,
        wpindex: AtomicId,
        process: AtomicId,
        host: AtomicId,
    ) -> Self {
        Self {
            wpclass,
            wpindex,
            process,
            host,
        }
    }

    /// All components wildcarded.
    pub const fn any() -> Self {
        Self::new(
            AtomicId::WILDCARD,
            AtomicId::WILDCARD,
            AtomicId::WILDCARD,
            AtomicId::WILDCARD,
        )
    }

    /// Publish destination for the given scope as seen from `(process, host)`.
    pub fn publish(scope: Scope, process: AtomicId, host: AtomicId) -> Self {
        let pattern = scope.pattern(process, host);
        Self::new(AID_PUBLISH, AID_PUBLISH, pattern.process, pattern.host)
    }

    pub fn is_publish(&self) -> bool {
        self.wpclass == AID_PUBLISH
    }

    /// `(process, host)` of this address as a two-component id.
    pub fn peer_id(&self) -> Hiid {
        Hiid::from([self.process, self.host])
    }

    /// All four components as an id, for building `Hello.<addr>` and friends.
    pub fn to_hiid(&self) -> Hiid {
        Hiid::from([self.wpclass, self.wpindex, self.process, self.host])
    }

    /// Wildcard-aware component-wise comparison.
    pub fn matches(&self, other: &MsgAddress) -> bool {
        self.wpclass.matches(other.wpclass)
            && self.wpindex.matches(other.wpindex)
            && self.process.matches(other.process)
            && self.host.matches(other.host)
    }

    pub fn pack(&self, buf: &mut Vec<u8>) {
        put_i32(buf, self.wpclass.value());
        put_i32(buf, self.wpindex.value());
        put_i32(buf, self.process.value());
        put_i32(buf, self.host.value());
    }

    pub(crate) fn unpack(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self::new(
            AtomicId::new(r.i32("address class")?),
            AtomicId::new(r.i32("address index")?),
            AtomicId::new(r.i32("address process")?),
            AtomicId::new(r.i32("address host")?),
        ))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PACKED_ADDRESS_SIZE);
        self.pack(&mut buf);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);
        let addr = Self::unpack(&mut r)?;
        r.finish("address")?;
        Ok(addr)
    }

    /// Render with registered names, e.g. `GatewayWP.1.4242.17`.
    pub fn display(&self, registry: &AidRegistry) -> String {
        format!(
            "{}.{}.{}.{}",
            registry.aid_string(self.wpclass),
            self.wpindex,
            self.process,
            self.host
        )
    }
}

impl fmt::Display for MsgAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.wpclass, self.wpindex, self.process, self.host
        )
    }
}

impl fmt::Debug for MsgAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MsgAddress({})", self)
    }
}

/// How far a publish (or a subscription) reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// This process only.
    Local,
    /// Every process on this host.
    Host,
    /// Anywhere reachable through gateways.
    Global,
}

impl Scope {
    /// Address pattern covering the scope as seen from `(process, host)`.
    pub fn pattern(self, process: AtomicId, host: AtomicId) -> MsgAddress {
        let w = AtomicId::WILDCARD;
        match self {
            Scope::Local => MsgAddress::new(w, w, process, host),
            Scope::Host => MsgAddress::new(w, w, w, host),
            Scope::Global => MsgAddress::any(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Local => write!(f, "local"),
            Scope::Host => write!(f, "host"),
            Scope::Global => write!(f, "global"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aid::AID_GATEWAY_WP;

    fn addr(c: i32, i: i32, p: i32, h: i32) -> MsgAddress {
        MsgAddress::new(c.into(), i.into(), p.into(), h.into())
    }

    #[test]
    fn test_pack_is_sixteen_bytes() {
        let a = addr(-1050, 1, 4242, 17);
        let bytes = a.to_bytes();
        assert_eq!(bytes.len(), PACKED_ADDRESS_SIZE);
        assert_eq!(MsgAddress::from_bytes(&bytes).unwrap(), a);
    }

    #[test]
    fn test_wildcard_matching() {
        let a = addr(-1050, 1, 4242, 17);
        assert!(MsgAddress::any().matches(&a));
        assert!(Scope::Local.pattern(4242.into(), 17.into()).matches(&a));
        assert!(!Scope::Local.pattern(4243.into(), 17.into()).matches(&a));
        assert!(Scope::Host.pattern(1.into(), 17.into()).matches(&a));
        assert!(!a.matches(&addr(-1050, 2, 4242, 17)));
    }

    #[test]
    fn test_publish_address() {
        let local = MsgAddress::publish(Scope::Local, 5.into(), 6.into());
        assert!(local.is_publish());
        assert_eq!(local.process, AtomicId::new(5));
        let global = MsgAddress::publish(Scope::Global, 5.into(), 6.into());
        assert!(global.process.is_wildcard() && global.host.is_wildcard());
    }

    #[test]
    fn test_display_with_registry() {
        let reg = AidRegistry::standard();
        let a = MsgAddress::new(AID_GATEWAY_WP, 1.into(), 10.into(), 20.into());
        assert_eq!(a.display(&reg), "GatewayWP.1.10.20");
        assert_eq!(a.to_hiid().len(), 4);
        assert_eq!(a.peer_id(), Hiid::from([AtomicId::new(10), AtomicId::new(20)]));
    }
}
