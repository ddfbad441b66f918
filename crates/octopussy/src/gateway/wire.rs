// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet framing for gateway links.
//!
//! Every message block travels as one DATA packet:
//!
//! ```text
//! +-----------+------+-------------+------------------+----------------------------+
//! | "oMs" (3) | type | content u32 | block (content)  | seq u32 | cksum u32 | msgsize u32 |
//! +-----------+------+-------------+------------------+----------------------------+
//! |<------------ header: 8 ------->|                  |<--------- trailer: 12 ----------->|
//! ```
//!
//! PING, ACK and RETRY packets are a bare header with `content = 0`.
//! All integers are big-endian. `msgsize` is 0 on every block but the last
//! one of a message, where it holds the message's block count.

use std::fmt;

/// Packet signature.
pub const SIGNATURE: [u8; 3] = *b"oMs";

/// Encoded header size.
pub const HEADER_SIZE: usize = 8;

/// Encoded trailer size.
pub const TRAILER_SIZE: usize = 12;

/// Packet type carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Ping = 0,
    Data = 1,
    Ack = 2,
    Retry = 3,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(PacketType::Ping),
            1 => Some(PacketType::Data),
            2 => Some(PacketType::Ack),
            3 => Some(PacketType::Retry),
            _ => None,
        }
    }

    /// Whether a block and trailer follow the header.
    pub fn has_body(self) -> bool {
        self == PacketType::Data
    }
}

/// Why a header failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// Signature mismatch, detected as soon as the first bytes disagree.
    Signature,
    /// Unknown packet type.
    Type(u8),
    /// Block length beyond the configured maximum.
    TooLarge(u32),
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderError::Signature => write!(f, "bad signature"),
            HeaderError::Type(t) => write!(f, "unknown packet type {}", t),
            HeaderError::TooLarge(n) => write!(f, "block of {} bytes exceeds limit", n),
        }
    }
}

/// Packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketType,
    pub content: u32,
}

impl PacketHeader {
    pub fn new(kind: PacketType, content: u32) -> Self {
        Self { kind, content }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..3].copy_from_slice(&SIGNATURE);
        out[3] = self.kind as u8;
        out[4..].copy_from_slice(&self.content.to_be_bytes());
        out
    }

    /// Decode a header from the first [`HEADER_SIZE`] bytes of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` is too short but is a valid prefix.
    pub fn decode(buf: &[u8], max_content: usize) -> Result<Option<Self>, HeaderError> {
        let prefix = buf.len().min(SIGNATURE.len());
        if buf[..prefix] != SIGNATURE[..prefix] {
            return Err(HeaderError::Signature);
        }
        if buf.len() < HEADER_SIZE {
            if buf.len() > 3 && PacketType::from_u8(buf[3]).is_none() {
                return Err(HeaderError::Type(buf[3]));
            }
            return Ok(None);
        }
        let kind = PacketType::from_u8(buf[3]).ok_or(HeaderError::Type(buf[3]))?;
        let content = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if content as usize > max_content {
            return Err(HeaderError::TooLarge(content));
        }
        Ok(Some(Self { kind, content }))
    }
}

/// Packet trailer following a DATA block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketTrailer {
    pub seq: u32,
    pub checksum: u32,
    pub msgsize: u32,
}

impl PacketTrailer {
    pub fn encode(&self) -> [u8; TRAILER_SIZE] {
        let mut out = [0u8; TRAILER_SIZE];
        out[..4].copy_from_slice(&self.seq.to_be_bytes());
        out[4..8].copy_from_slice(&self.checksum.to_be_bytes());
        out[8..].copy_from_slice(&self.msgsize.to_be_bytes());
        out
    }

    /// Decode from the first [`TRAILER_SIZE`] bytes; `None` if too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < TRAILER_SIZE {
            return None;
        }
        let word = |i: usize| u32::from_be_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Some(Self {
            seq: word(0),
            checksum: word(4),
            msgsize: word(8),
        })
    }
}

/// Block checksum: wrapping sum of all bytes.
pub fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
}

/// Encode a complete DATA packet (used by tests and benchmarks).
pub fn encode_data_packet(block: &[u8], seq: u32, msgsize: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + block.len() + TRAILER_SIZE);
    out.extend_from_slice(&PacketHeader::new(PacketType::Data, block.len() as u32).encode());
    out.extend_from_slice(block);
    out.extend_from_slice(
        &PacketTrailer {
            seq,
            checksum: checksum(block),
            msgsize,
        }
        .encode(),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let h = PacketHeader::new(PacketType::Data, 0x0102_0304);
        assert_eq!(h.encode(), [b'o', b'M', b's', 1, 1, 2, 3, 4]);
        assert_eq!(PacketHeader::decode(&h.encode(), usize::MAX), Ok(Some(h)));
    }

    #[test]
    fn test_header_partial_prefix() {
        assert_eq!(PacketHeader::decode(b"oM", 10), Ok(None));
        assert_eq!(PacketHeader::decode(b"oMs\x00\x00", 10), Ok(None));
        assert_eq!(PacketHeader::decode(b"oX", 10), Err(HeaderError::Signature));
        assert_eq!(PacketHeader::decode(b"oMs\x09", 10), Err(HeaderError::Type(9)));
    }

    #[test]
    fn test_header_too_large() {
        let h = PacketHeader::new(PacketType::Data, 100).encode();
        assert_eq!(PacketHeader::decode(&h, 99), Err(HeaderError::TooLarge(100)));
    }

    #[test]
    fn test_trailer_layout() {
        let t = PacketTrailer {
            seq: 1,
            checksum: 2,
            msgsize: 3,
        };
        let bytes = t.encode();
        assert_eq!(bytes, [0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]);
        assert_eq!(PacketTrailer::decode(&bytes), Some(t));
        assert_eq!(PacketTrailer::decode(&bytes[..11]), None);
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[1, 2, 255]), 258);
        let big = vec![0xFFu8; 1 << 20];
        assert_eq!(checksum(&big), 0xFF * (1 << 20));
    }

    #[test]
    fn test_data_packet_size() {
        let pkt = encode_data_packet(b"hello", 7, 1);
        assert_eq!(pkt.len(), HEADER_SIZE + 5 + TRAILER_SIZE);
        assert_eq!(&pkt[8..13], b"hello");
    }
}
