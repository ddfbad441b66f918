// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Atomic identifiers and their name registry.
//!
//! An [`AtomicId`] is a small signed integer. Negative values are symbolic
//! names registered in an [`AidRegistry`]; non-negative values stand for
//! themselves (indices, process ids, host ids). The registry is an ordinary
//! value built at startup and shared through [`crate::Context`].

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::hiid::Hiid;

/// A single component of a [`Hiid`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AtomicId(i32);

impl AtomicId {
    /// The null id.
    pub const NULL: AtomicId = AtomicId(0);
    /// Matches any single component (or, in trailing position, any suffix).
    pub const WILDCARD: AtomicId = AtomicId(-1);

    /// Wrap a raw value.
    #[inline]
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Raw integer value.
    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }

    #[inline]
    pub fn is_wildcard(self) -> bool {
        self == Self::WILDCARD
    }

    /// Equality where a wildcard on either side matches anything.
    #[inline]
    pub fn matches(self, other: AtomicId) -> bool {
        self == other || self.is_wildcard() || other.is_wildcard()
    }
}

impl From<i32> for AtomicId {
    fn from(v: i32) -> Self {
        Self(v)
    }
}

impl fmt::Debug for AtomicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for AtomicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            write!(f, "*")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// ============================================================================
// Well-known ids
// ============================================================================

pub const AID_GW: AtomicId = AtomicId(-1079);
pub const AID_SERVER: AtomicId = AtomicId(-1061);
pub const AID_OPEN: AtomicId = AtomicId(-1069);
pub const AID_LOCAL: AtomicId = AtomicId(-1059);
pub const AID_NETWORK: AtomicId = AtomicId(-1055);
pub const AID_ERROR: AtomicId = AtomicId(-1071);
pub const AID_BIND: AtomicId = AtomicId(-1066);
pub const AID_FATAL: AtomicId = AtomicId(-1089);
pub const AID_REMOTE: AtomicId = AtomicId(-1063);
pub const AID_UP: AtomicId = AtomicId(-1074);
pub const AID_DOWN: AtomicId = AtomicId(-1076);
pub const AID_DUPLICATE: AtomicId = AtomicId(-1065);
pub const AID_HOST: AtomicId = AtomicId(-1083);
pub const AID_PORT: AtomicId = AtomicId(-1082);
pub const AID_PEERS: AtomicId = AtomicId(-1057);
pub const AID_SUBSCRIPTIONS: AtomicId = AtomicId(-1044);
pub const AID_INIT: AtomicId = AtomicId(-1092);
pub const AID_HEARTBEAT: AtomicId = AtomicId(-1068);
pub const AID_RECONNECT: AtomicId = AtomicId(-1101);
pub const AID_REOPEN: AtomicId = AtomicId(-1058);
pub const AID_TIMESTAMP: AtomicId = AtomicId(-1032);
pub const AID_GATEWAY_WP: AtomicId = AtomicId(-1050);
pub const AID_GW_SERVER_WP: AtomicId = AtomicId(-1081);
pub const AID_GW_CLIENT_WP: AtomicId = AtomicId(-1091);
pub const AID_CONNECTION_MGR_WP: AtomicId = AtomicId(-1048);
pub const AID_PUBLISH: AtomicId = AtomicId(-1077);
pub const AID_DISPATCHER: AtomicId = AtomicId(-1097);
pub const AID_SUBSCRIBE: AtomicId = AtomicId(-1096);
pub const AID_HELLO: AtomicId = AtomicId(-1086);
pub const AID_BYE: AtomicId = AtomicId(-1047);
pub const AID_MESSAGE: AtomicId = AtomicId(-1067);
pub const AID_INDEX: AtomicId = AtomicId(-1045);
pub const AID_TEXT: AtomicId = AtomicId(-1269);
pub const AID_LOGGER_WP: AtomicId = AtomicId(-1099);
pub const AID_STATE: AtomicId = AtomicId(-1052);
pub const AID_CONNECTED: AtomicId = AtomicId(-1070);
pub const AID_CONNECTION: AtomicId = AtomicId(-1073);
pub const AID_ADD: AtomicId = AtomicId(-1087);
pub const AID_GATEWAY: AtomicId = AtomicId(-1046);
pub const AID_LIST: AtomicId = AtomicId(-1053);
pub const AID_HOSTS: AtomicId = AtomicId(-1078);
pub const AID_PORTS: AtomicId = AtomicId(-1051);
pub const AID_FAIL_CONNECT: AtomicId = AtomicId(-1085);
pub const AID_CLIENT: AtomicId = AtomicId(-1094);
pub const AID_BOUND: AtomicId = AtomicId(-1056);
pub const AID_TYPE: AtomicId = AtomicId(-1098);

/// Names known to every registry built with [`AidRegistry::standard`].
pub const STANDARD_AIDS: &[(&str, AtomicId)] = &[
    ("GW", AID_GW),
    ("Server", AID_SERVER),
    ("Open", AID_OPEN),
    ("Local", AID_LOCAL),
    ("Network", AID_NETWORK),
    ("Error", AID_ERROR),
    ("Bind", AID_BIND),
    ("Fatal", AID_FATAL),
    ("Remote", AID_REMOTE),
    ("Up", AID_UP),
    ("Down", AID_DOWN),
    ("Duplicate", AID_DUPLICATE),
    ("Host", AID_HOST),
    ("Port", AID_PORT),
    ("Peers", AID_PEERS),
    ("Subscriptions", AID_SUBSCRIPTIONS),
    ("Init", AID_INIT),
    ("Heartbeat", AID_HEARTBEAT),
    ("Reconnect", AID_RECONNECT),
    ("Reopen", AID_REOPEN),
    ("Timestamp", AID_TIMESTAMP),
    ("GatewayWP", AID_GATEWAY_WP),
    ("GWServerWP", AID_GW_SERVER_WP),
    ("GWClientWP", AID_GW_CLIENT_WP),
    ("ConnectionMgrWP", AID_CONNECTION_MGR_WP),
    ("Publish", AID_PUBLISH),
    ("Dispatcher", AID_DISPATCHER),
    ("Subscribe", AID_SUBSCRIBE),
    ("Hello", AID_HELLO),
    ("Bye", AID_BYE),
    ("Message", AID_MESSAGE),
    ("Index", AID_INDEX),
    ("Text", AID_TEXT),
    ("LoggerWP", AID_LOGGER_WP),
    ("State", AID_STATE),
    ("Connected", AID_CONNECTED),
    ("Connection", AID_CONNECTION),
    ("Add", AID_ADD),
    ("Gateway", AID_GATEWAY),
    ("List", AID_LIST),
    ("Hosts", AID_HOSTS),
    ("Ports", AID_PORTS),
    ("FailConnect", AID_FAIL_CONNECT),
    ("Client", AID_CLIENT),
    ("Bound", AID_BOUND),
    ("Type", AID_TYPE),
];

// ============================================================================
// Registry
// ============================================================================

/// Bidirectional name table for symbolic atomic ids.
///
/// Lookup by name is case-insensitive; [`AidRegistry::name`] returns the
/// spelling used at registration.
#[derive(Debug, Clone)]
pub struct AidRegistry {
    by_name: HashMap<String, AtomicId>,
    names: HashMap<AtomicId, String>,
    next: i32,
}

impl AidRegistry {
    /// Registry with no names at all.
    pub fn empty() -> Self {
        Self {
            by_name: HashMap::new(),
            names: HashMap::new(),
            next: -2,
        }
    }

    /// Registry preloaded with [`STANDARD_AIDS`].
    pub fn standard() -> Self {
        let mut reg = Self::empty();
        for &(name, id) in STANDARD_AIDS {
            reg.insert(name, id);
        }
        reg
    }

    /// Builder form of [`AidRegistry::register`].
    pub fn with_names<'a, I>(mut self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for name in names {
            self.register(name)?;
        }
        Ok(self)
    }

    fn insert(&mut self, name: &str, id: AtomicId) {
        self.by_name.insert(name.to_ascii_lowercase(), id);
        self.names.insert(id, name.to_string());
        if id.value() <= self.next {
            self.next = id.value() - 1;
        }
    }

    /// Intern `name`, returning the existing id if it is already known.
    pub fn register(&mut self, name: &str) -> Result<AtomicId> {
        if let Some(id) = self.lookup(name) {
            return Ok(id);
        }
        let valid = !name.is_empty()
            && name != "*"
            && !name.contains('.')
            && !name.bytes().all(|b| b.is_ascii_digit());
        if !valid {
            return Err(Error::UnknownAtomicId(format!(
                "'{}' cannot be registered as a name",
                name
            )));
        }
        let id = AtomicId(self.next);
        self.insert(name, id);
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<AtomicId> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn name(&self, id: AtomicId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Parse one component: `*`, a decimal number, or a registered name.
    pub fn parse_aid(&self, s: &str) -> Result<AtomicId> {
        if s == "*" {
            return Ok(AtomicId::WILDCARD);
        }
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            return s
                .parse::<i32>()
                .map(AtomicId)
                .map_err(|_| Error::UnknownAtomicId(s.to_string()));
        }
        self.lookup(s)
            .ok_or_else(|| Error::UnknownAtomicId(s.to_string()))
    }

    /// Parse a dotted id such as `GW.Remote.*`. The empty string is the empty id.
    pub fn parse_hiid(&self, s: &str) -> Result<Hiid> {
        if s.is_empty() {
            return Ok(Hiid::new());
        }
        s.split('.')
            .map(|part| self.parse_aid(part))
            .collect::<Result<Vec<_>>>()
            .map(Hiid::from)
    }

    /// Render a single id by name when known.
    pub fn aid_string(&self, id: AtomicId) -> String {
        match self.name(id) {
            Some(name) => name.to_string(),
            None => id.to_string(),
        }
    }

    /// Display adapter rendering `hiid` with registered names.
    pub fn display<'a>(&'a self, hiid: &'a Hiid) -> HiidDisplay<'a> {
        HiidDisplay {
            registry: self,
            hiid,
        }
    }
}

impl Default for AidRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// See [`AidRegistry::display`].
pub struct HiidDisplay<'a> {
    registry: &'a AidRegistry,
    hiid: &'a Hiid,
}

impl fmt::Display for HiidDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, aid) in self.hiid.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match self.registry.name(*aid) {
                Some(name) => f.write_str(name)?,
                None => write!(f, "{}", aid)?,
            }
        }
        Ok(())
    }
}
