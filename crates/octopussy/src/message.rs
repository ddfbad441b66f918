// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message envelope and its block serialization.
//!
//! Messages are shared between recipients as [`MessageRef`] (`Arc`). A holder
//! that needs a modified copy calls `Arc::make_mut`, which clones only when
//! the message is still shared.
//!
//! # Block layout
//!
//! ```text
//! id        u32 len + len * i32
//! from      4 * i32
//! to        4 * i32
//! priority  i32
//! state     i32
//! hops      u32
//! flags     u8   (bit 0: payload present, bit 1: data present)
//! payload   u32 len + packed Record        (if flag 0)
//! data      u32 len + bytes                (if flag 1)
//! ```
//!
//! The serialized form is cut into blocks of at most `max_block_size` bytes
//! for framing. `forwarder` is not serialized.

use std::sync::Arc;

use crate::address::MsgAddress;
use crate::codec::{put_bytes, put_i32, put_u32, put_u8, ByteReader};
use crate::error::{Error, Result};
use crate::hiid::Hiid;
use crate::record::Record;

const FLAG_PAYLOAD: u8 = 0x01;
const FLAG_DATA: u8 = 0x02;

/// Shared, immutable handle to a message.
pub type MessageRef = Arc<Message>;

/// Priority levels; higher is delivered first.
pub mod priority {
    pub const LOWEST: i32 = -20;
    pub const LOW: i32 = -10;
    pub const NORMAL: i32 = 0;
    pub const HIGH: i32 = 10;
    pub const HIGHEST: i32 = 20;
}

/// A routed message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Hiid,
    pub from: MsgAddress,
    pub to: MsgAddress,
    pub priority: i32,
    pub state: i32,
    /// Number of gateway traversals so far.
    pub hops: u32,
    /// Gateway that injected this message into the local dispatcher.
    pub forwarder: MsgAddress,
    pub payload: Option<Record>,
    /// Raw block carried alongside the payload (packed subscriptions etc).
    pub data: Option<Vec<u8>>,
}

impl Message {
    pub fn new(id: impl Into<Hiid>) -> Self {
        Self {
            id: id.into(),
            from: MsgAddress::default(),
            to: MsgAddress::default(),
            priority: priority::NORMAL,
            state: 0,
            hops: 0,
            forwarder: MsgAddress::default(),
            payload: None,
            data: None,
        }
    }

    pub fn with_payload(mut self, payload: Record) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_state(mut self, state: i32) -> Self {
        self.state = state;
        self
    }

    /// Payload record, creating an empty one on first use.
    pub fn payload_mut(&mut self) -> &mut Record {
        self.payload.get_or_insert_with(Record::new)
    }

    pub fn into_ref(self) -> MessageRef {
        Arc::new(self)
    }

    // ------------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------------

    /// Serialize to a single contiguous buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(64);
        self.id.pack(&mut buf);
        self.from.pack(&mut buf);
        self.to.pack(&mut buf);
        put_i32(&mut buf, self.priority);
        put_i32(&mut buf, self.state);
        put_u32(&mut buf, self.hops);

        let mut flags = 0;
        if self.payload.is_some() {
            flags |= FLAG_PAYLOAD;
        }
        if self.data.is_some() {
            flags |= FLAG_DATA;
        }
        put_u8(&mut buf, flags);

        if let Some(payload) = &self.payload {
            put_bytes(&mut buf, &payload.to_bytes()?)?;
        }
        if let Some(data) = &self.data {
            put_bytes(&mut buf, data)?;
        }
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);
        let id = Hiid::unpack(&mut r)?;
        let from = MsgAddress::unpack(&mut r)?;
        let to = MsgAddress::unpack(&mut r)?;
        let priority = r.i32("priority")?;
        let state = r.i32("state")?;
        let hops = r.u32("hops")?;
        let flags = r.u8("flags")?;
        if flags & !(FLAG_PAYLOAD | FLAG_DATA) != 0 {
            return Err(Error::Corrupt(format!("unknown message flags {:#04x}", flags)));
        }
        let payload = if flags & FLAG_PAYLOAD != 0 {
            Some(Record::from_bytes(r.bytes("payload")?)?)
        } else {
            None
        };
        let body = if flags & FLAG_DATA != 0 {
            Some(r.bytes("data")?.to_vec())
        } else {
            None
        };
        r.finish("message")?;

        Ok(Self {
            id,
            from,
            to,
            priority,
            state,
            hops,
            forwarder: MsgAddress::default(),
            payload,
            data: body,
        })
    }

    /// Serialize and cut into blocks of at most `max_block_size` bytes.
    pub fn to_blocks(&self, max_block_size: usize) -> Result<Vec<Vec<u8>>> {
        let bytes = self.to_bytes()?;
        let size = max_block_size.max(1);
        Ok(bytes.chunks(size).map(<[u8]>::to_vec).collect())
    }

    /// Reassemble a message from the blocks produced by [`Message::to_blocks`].
    pub fn from_blocks(blocks: &[Vec<u8>]) -> Result<Self> {
        if blocks.is_empty() {
            return Err(Error::Corrupt("message with no blocks".into()));
        }
        if blocks.len() == 1 {
            return Self::from_bytes(&blocks[0]);
        }
        let total = blocks.iter().map(Vec::len).sum();
        let mut joined = Vec::with_capacity(total);
        for block in blocks {
            joined.extend_from_slice(block);
        }
        Self::from_bytes(&joined)
    }
}
