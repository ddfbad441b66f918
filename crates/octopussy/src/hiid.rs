// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hierarchical identifiers.
//!
//! A [`Hiid`] is an ordered sequence of [`AtomicId`]s used both as a message
//! type (`GW.Remote.Up.<process>.<host>`) and as a subscription pattern
//! (`GW.Remote.*`).
//!
//! # Matching
//!
//! Components are compared pairwise; a wildcard on either side matches one
//! component. A wildcard in the last position of either operand matches the
//! rest of the other operand (one or more components). Otherwise both ids
//! must have the same length.

use std::fmt;

use crate::aid::AtomicId;
use crate::codec::{put_i32, put_u32, ByteReader};
use crate::error::Result;

/// Ordered sequence of atomic ids, compared lexicographically.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hiid(Vec<AtomicId>);

impl Hiid {
    /// The empty id.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[AtomicId] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AtomicId> {
        self.0.iter()
    }

    pub fn get(&self, index: usize) -> Option<AtomicId> {
        self.0.get(index).copied()
    }

    pub fn push(&mut self, aid: AtomicId) {
        self.0.push(aid);
    }

    /// Return a copy with `aid` appended.
    pub fn with(mut self, aid: AtomicId) -> Self {
        self.0.push(aid);
        self
    }

    /// Return a copy with every component of `tail` appended.
    pub fn concat(mut self, tail: &Hiid) -> Self {
        self.0.extend_from_slice(&tail.0);
        self
    }

    /// Components `[start..]`, empty when out of range.
    pub fn subid(&self, start: usize) -> Hiid {
        Hiid(self.0.get(start..).map(<[_]>::to_vec).unwrap_or_default())
    }

    /// True if the first components equal `prefix` exactly (no wildcards).
    pub fn prefixed_by(&self, prefix: &Hiid) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Wildcard-aware match, symmetric in its operands.
    pub fn matches(&self, other: &Hiid) -> bool {
        let (a, b) = (&self.0, &other.0);
        let mut i = 0;
        loop {
            match (a.get(i), b.get(i)) {
                (None, None) => return true,
                (Some(&x), Some(&y)) => {
                    if (x.is_wildcard() && i + 1 == a.len()) || (y.is_wildcard() && i + 1 == b.len())
                    {
                        return true;
                    }
                    if !x.matches(y) {
                        return false;
                    }
                }
                _ => return false,
            }
            i += 1;
        }
    }

    // ------------------------------------------------------------------------
    // Packing
    // ------------------------------------------------------------------------

    /// Append `u32 len` + `len * i32` to `buf`.
    pub fn pack(&self, buf: &mut Vec<u8>) {
        put_u32(buf, self.0.len() as u32);
        for aid in &self.0 {
            put_i32(buf, aid.value());
        }
    }

    pub(crate) fn unpack(r: &mut ByteReader<'_>) -> Result<Self> {
        let len = r.u32("hiid length")? as usize;
        if len.saturating_mul(4) > r.remaining() {
            return Err(crate::Error::Truncated {
                what: "hiid components",
                needed: len.saturating_mul(4),
                available: r.remaining(),
            });
        }
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(AtomicId::new(r.i32("hiid component")?));
        }
        Ok(Self(out))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 4 * self.0.len());
        self.pack(&mut buf);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);
        let id = Self::unpack(&mut r)?;
        r.finish("hiid")?;
        Ok(id)
    }
}

impl From<Vec<AtomicId>> for Hiid {
    fn from(v: Vec<AtomicId>) -> Self {
        Self(v)
    }
}

impl From<&[AtomicId]> for Hiid {
    fn from(v: &[AtomicId]) -> Self {
        Self(v.to_vec())
    }
}

impl<const N: usize> From<[AtomicId; N]> for Hiid {
    fn from(v: [AtomicId; N]) -> Self {
        Self(v.to_vec())
    }
}

impl From<AtomicId> for Hiid {
    fn from(aid: AtomicId) -> Self {
        Self(vec![aid])
    }
}

impl FromIterator<AtomicId> for Hiid {
    fn from_iter<I: IntoIterator<Item = AtomicId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Hiid {
    type Item = &'a AtomicId;
    type IntoIter = std::slice::Iter<'a, AtomicId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Hiid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, aid) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", aid)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hiid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hiid({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: AtomicId = AtomicId::WILDCARD;

    fn h(v: &[i32]) -> Hiid {
        v.iter().map(|&x| AtomicId::new(x)).collect()
    }

    #[test]
    fn test_exact_match_only_itself() {
        let id = h(&[-10, -11, -12]);
        assert!(id.matches(&id.clone()));
        assert!(!id.matches(&h(&[-10, -11])));
        assert!(!id.matches(&h(&[-10, -11, -12, -13])));
        assert!(!id.matches(&h(&[-10, -11, -13])));
    }

    #[test]
    fn test_trailing_wildcard_matches_suffix() {
        let pat = h(&[-10, -11]).with(W);
        assert!(pat.matches(&h(&[-10, -11, -12])));
        assert!(pat.matches(&h(&[-10, -11, -12, -13, -14])));
        assert!(!pat.matches(&h(&[-10, -11])));
        assert!(!pat.matches(&h(&[-10, -12, -12])));
        // symmetric
        assert!(h(&[-10, -11, -12]).matches(&pat));
    }

    #[test]
    fn test_inner_wildcard_matches_one() {
        let pat = Hiid::from([AtomicId::new(-10), W, AtomicId::new(-12)]);
        assert!(pat.matches(&h(&[-10, -99, -12])));
        assert!(!pat.matches(&h(&[-10, -99, -13])));
        assert!(!pat.matches(&h(&[-10, -99, -12, -5])));
    }

    #[test]
    fn test_all_wildcard_pattern() {
        let pat = Hiid::from([W, W]);
        assert!(pat.matches(&h(&[1, 2])));
        assert!(pat.matches(&h(&[1, 2, 3, 4])));
        assert!(!pat.matches(&h(&[1])));
    }

    #[test]
    fn test_empty_ids() {
        assert!(Hiid::new().matches(&Hiid::new()));
        assert!(!Hiid::new().matches(&h(&[1])));
    }

    #[test]
    fn test_prefix_and_subid() {
        let id = h(&[-1079, -1063, -1074, 42, 7]);
        assert!(id.prefixed_by(&h(&[-1079, -1063])));
        assert!(!id.prefixed_by(&h(&[-1063])));
        assert_eq!(id.subid(3), h(&[42, 7]));
        assert!(id.subid(10).is_empty());
    }

    #[test]
    fn test_pack_unpack() {
        let id = h(&[-1079, -1, 3]);
        let bytes = id.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(Hiid::from_bytes(&bytes).unwrap(), id);
    }

    #[test]
    fn test_unpack_huge_length_is_truncated() {
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 1];
        assert!(Hiid::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        assert!(h(&[1, 2]) < h(&[1, 3]));
        assert!(h(&[1]) < h(&[1, 0]));
    }
}
