// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-work-process subscription sets.
//!
//! Each entry pairs a message-id mask with a `from` address pattern derived
//! from the subscription [`Scope`]. A message matches when some entry's mask
//! matches the message id and its pattern matches the sender address.

use crate::address::MsgAddress;
use crate::codec::{put_u32, ByteReader};
use crate::error::Result;
use crate::hiid::Hiid;
use crate::message::Message;

/// One subscription entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub mask: Hiid,
    pub from: MsgAddress,
}

impl Subscription {
    pub fn matches(&self, msg: &Message) -> bool {
        self.mask.matches(&msg.id) && self.from.matches(&msg.from)
    }
}

/// Ordered set of subscriptions, unique by mask.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Subscriptions {
    entries: Vec<Subscription>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `mask` with the given sender pattern, replacing any entry with the
    /// same mask. Returns true if the set changed.
    pub fn add(&mut self, mask: Hiid, from: MsgAddress) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.mask == mask) {
            if entry.from == from {
                return false;
            }
            entry.from = from;
            return true;
        }
        self.entries.push(Subscription { mask, from });
        true
    }

    /// Remove the entry for `mask`. Returns true if one was present.
    pub fn remove(&mut self, mask: &Hiid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.mask != mask);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn matches(&self, msg: &Message) -> bool {
        self.entries.iter().any(|e| e.matches(msg))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Subscription> {
        self.entries.iter()
    }

    pub fn pack(&self, buf: &mut Vec<u8>) {
        put_u32(buf, self.entries.len() as u32);
        for e in &self.entries {
            e.mask.pack(buf);
            e.from.pack(buf);
        }
    }

    pub(crate) fn unpack(r: &mut ByteReader<'_>) -> Result<Self> {
        let count = r.u32("subscription count")?;
        let mut subs = Self::new();
        for _ in 0..count {
            let mask = Hiid::unpack(r)?;
            let from = MsgAddress::unpack(r)?;
            subs.add(mask, from);
        }
        Ok(subs)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.pack(&mut buf);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);
        let subs = Self::unpack(&mut r)?;
        r.finish("subscriptions")?;
        Ok(subs)
    }
}

impl<'a> IntoIterator for &'a Subscriptions {
    type Item = &'a Subscription;
    type IntoIter = std::slice::Iter<'a, Subscription>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Scope;
    use crate::aid::AtomicId;

    fn id(v: &[i32]) -> Hiid {
        v.iter().map(|&x| AtomicId::new(x)).collect()
    }

    fn msg_from(mid: Hiid, process: i32, host: i32) -> Message {
        let mut m = Message::new(mid);
        m.from = MsgAddress::new((-7).into(), 1.into(), process.into(), host.into());
        m
    }

    #[test]
    fn test_scope_filters_sender() {
        let mut subs = Subscriptions::new();
        subs.add(
            id(&[-10]).with(AtomicId::WILDCARD),
            Scope::Local.pattern(1.into(), 2.into()),
        );
        assert!(subs.matches(&msg_from(id(&[-10, -11]), 1, 2)));
        assert!(!subs.matches(&msg_from(id(&[-10, -11]), 3, 2)));
        assert!(!subs.matches(&msg_from(id(&[-12, -11]), 1, 2)));
    }

    #[test]
    fn test_add_replaces_same_mask() {
        let mut subs = Subscriptions::new();
        assert!(subs.add(id(&[-10]), MsgAddress::any()));
        assert!(!subs.add(id(&[-10]), MsgAddress::any()));
        assert!(subs.add(id(&[-10]), Scope::Host.pattern(1.into(), 2.into())));
        assert_eq!(subs.len(), 1);
        assert!(subs.remove(&id(&[-10])));
        assert!(!subs.remove(&id(&[-10])));
        assert!(subs.is_empty());
    }

    #[test]
    fn test_pack_unpack() {
        let mut subs = Subscriptions::new();
        subs.add(id(&[-10, -1]), MsgAddress::any());
        subs.add(id(&[-11]), Scope::Local.pattern(5.into(), 6.into()));
        let back = Subscriptions::from_bytes(&subs.to_bytes()).unwrap();
        assert_eq!(back, subs);
    }

    #[test]
    fn test_empty_pack() {
        let subs = Subscriptions::new();
        assert_eq!(subs.to_bytes(), vec![0, 0, 0, 0]);
        assert!(Subscriptions::from_bytes(&[0, 0, 0, 0]).unwrap().is_empty());
    }
}
