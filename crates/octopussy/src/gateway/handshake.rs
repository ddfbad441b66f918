// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Handshake block: the routing table a gateway sends first.
//!
//! ```text
//! u32 nwp
//! nwp * { u32 addr_size, u32 subs_size }
//! nwp * { packed MsgAddress, packed Subscriptions }
//! ```

use crate::address::{MsgAddress, PACKED_ADDRESS_SIZE};
use crate::codec::{put_u32, ByteReader};
use crate::error::{Error, Result};
use crate::subscriptions::Subscriptions;

/// Pack `(address, subscriptions)` pairs into one handshake block.
pub fn pack<'a, I>(entries: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a MsgAddress, &'a Subscriptions)>,
{
    let packed: Vec<(Vec<u8>, Vec<u8>)> = entries
        .into_iter()
        .map(|(addr, subs)| (addr.to_bytes(), subs.to_bytes()))
        .collect();

    let body: usize = packed.iter().map(|(a, s)| a.len() + s.len()).sum();
    let mut buf = Vec::with_capacity(4 + packed.len() * 8 + body);
    put_u32(&mut buf, packed.len() as u32);
    for (addr, subs) in &packed {
        put_u32(&mut buf, addr.len() as u32);
        put_u32(&mut buf, subs.len() as u32);
    }
    for (addr, subs) in &packed {
        buf.extend_from_slice(addr);
        buf.extend_from_slice(subs);
    }
    buf
}

/// Unpack a handshake block. Any size mismatch is [`Error::Corrupt`].
pub fn unpack(data: &[u8]) -> Result<Vec<(MsgAddress, Subscriptions)>> {
    let mut r = ByteReader::new(data);
    let nwp = r.u32("handshake count")? as usize;
    // Each entry needs at least its two size words.
    if nwp > r.remaining() / 8 {
        return Err(Error::Corrupt(format!(
            "handshake claims {} entries in {} bytes",
            nwp,
            data.len()
        )));
    }

    let mut sizes = Vec::with_capacity(nwp);
    for _ in 0..nwp {
        let addr_size = r.u32("handshake address size")? as usize;
        let subs_size = r.u32("handshake subscriptions size")? as usize;
        if addr_size != PACKED_ADDRESS_SIZE {
            return Err(Error::Corrupt(format!(
                "handshake address block of {} bytes",
                addr_size
            )));
        }
        sizes.push((addr_size, subs_size));
    }

    let mut entries = Vec::with_capacity(nwp);
    for (addr_size, subs_size) in sizes {
        let addr = MsgAddress::from_bytes(r.take("handshake address", addr_size)?)?;
        let subs = Subscriptions::from_bytes(r.take("handshake subscriptions", subs_size)?)?;
        entries.push((addr, subs));
    }
    r.finish("handshake")?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aid::AtomicId;
    use crate::hiid::Hiid;

    fn addr(i: i32) -> MsgAddress {
        MsgAddress::new(AtomicId::new(-5000), AtomicId::new(i), AtomicId::new(10), AtomicId::new(20))
    }

    #[test]
    fn test_pack_unpack() {
        let mut subs = Subscriptions::new();
        subs.add(Hiid::from([AtomicId::new(-7), AtomicId::WILDCARD]), MsgAddress::any());
        let entries = vec![(addr(1), subs.clone()), (addr(2), Subscriptions::new())];
        let block = pack(entries.iter().map(|(a, s)| (a, s)));
        assert_eq!(unpack(&block).unwrap(), entries);
    }

    #[test]
    fn test_empty_table() {
        let block = pack(std::iter::empty());
        assert_eq!(block, vec![0, 0, 0, 0]);
        assert!(unpack(&block).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_sizes() {
        let subs = Subscriptions::new();
        let a = addr(1);
        let mut block = pack([(&a, &subs)]);
        block[7] = 15; // address size 16 -> 15
        assert!(matches!(unpack(&block), Err(Error::Corrupt(_))));

        let mut block = pack([(&a, &subs)]);
        block.push(0);
        assert!(unpack(&block).is_err());

        assert!(matches!(unpack(&[0, 0, 1, 0]), Err(Error::Corrupt(_))));
    }
}
