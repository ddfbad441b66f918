// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Incremental packet writer.
//!
//! Holds at most one message (as serialized blocks) and pushes it through a
//! non-blocking socket one segment at a time: header, block, trailer. A
//! `WouldBlock` leaves the writer mid-segment; the next [`PacketWriter::write_to`]
//! call resumes at the exact byte where it stopped.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::time::Instant;

use super::wire::{checksum, PacketHeader, PacketTrailer, PacketType};

/// Write state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Idle,
    Header,
    Block,
    Trailer,
}

/// Outcome of a write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Everything queued was written; the writer is idle.
    Done,
    /// The socket would block; wait for writability.
    Blocked,
}

/// Writer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub packets: u64,
    pub bytes: u64,
    pub messages: u64,
}

#[derive(Debug)]
pub struct PacketWriter {
    state: WriteState,
    blocks: VecDeque<Vec<u8>>,
    block_count: u32,
    segment: Vec<u8>,
    offset: usize,
    /// Block currently being written, kept until its trailer is built.
    current: Vec<u8>,
    control: Option<PacketType>,
    seq: u32,
    last_progress: Instant,
    stats: WriterStats,
}

impl Default for PacketWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketWriter {
    pub fn new() -> Self {
        Self {
            state: WriteState::Idle,
            blocks: VecDeque::new(),
            block_count: 0,
            segment: Vec::new(),
            offset: 0,
            current: Vec::new(),
            control: None,
            seq: 0,
            last_progress: Instant::now(),
            stats: WriterStats::default(),
        }
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == WriteState::Idle && self.control.is_none()
    }

    /// Time of the last byte accepted by the socket (or of the last enqueue).
    pub fn last_progress(&self) -> Instant {
        self.last_progress
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Queue one message. Returns false if another message is in flight.
    pub fn enqueue_message(&mut self, blocks: Vec<Vec<u8>>) -> bool {
        if !self.is_idle() || blocks.is_empty() {
            return false;
        }
        self.block_count = blocks.len() as u32;
        self.blocks = blocks.into();
        self.last_progress = Instant::now();
        self.next_block();
        true
    }

    /// Queue a bare control packet (PING, ACK, RETRY). Only accepted while
    /// idle, so it never splits a message.
    pub fn queue_control(&mut self, kind: PacketType) -> bool {
        if !self.is_idle() || kind.has_body() {
            return false;
        }
        self.control = Some(kind);
        self.segment = PacketHeader::new(kind, 0).encode().to_vec();
        self.offset = 0;
        self.state = WriteState::Header;
        self.last_progress = Instant::now();
        true
    }

    /// Write as much as the socket takes.
    pub fn write_to<W: Write + ?Sized>(&mut self, out: &mut W) -> io::Result<WriteStatus> {
        loop {
            if self.state == WriteState::Idle {
                return Ok(WriteStatus::Done);
            }
            while self.offset < self.segment.len() {
                match out.write(&self.segment[self.offset..]) {
                    Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                    Ok(n) => {
                        self.offset += n;
                        self.stats.bytes += n as u64;
                        self.last_progress = Instant::now();
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(WriteStatus::Blocked)
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }
            self.advance();
        }
    }

    fn advance(&mut self) {
        self.offset = 0;
        match self.state {
            WriteState::Header if self.control.take().is_some() => {
                self.stats.packets += 1;
                self.finish();
            }
            WriteState::Header => {
                self.segment = std::mem::take(&mut self.current);
                self.state = WriteState::Block;
            }
            WriteState::Block => {
                let last = self.blocks.is_empty();
                let trailer = PacketTrailer {
                    seq: self.seq,
                    checksum: checksum(&self.segment),
                    msgsize: if last { self.block_count } else { 0 },
                };
                self.seq = self.seq.wrapping_add(1);
                self.segment = trailer.encode().to_vec();
                self.state = WriteState::Trailer;
            }
            WriteState::Trailer => {
                self.stats.packets += 1;
                if self.blocks.is_empty() {
                    self.stats.messages += 1;
                    self.finish();
                } else {
                    self.next_block();
                }
            }
            WriteState::Idle => {}
        }
    }

    fn next_block(&mut self) {
        if let Some(block) = self.blocks.pop_front() {
            self.segment = PacketHeader::new(PacketType::Data, block.len() as u32)
                .encode()
                .to_vec();
            self.current = block;
            self.offset = 0;
            self.state = WriteState::Header;
        }
    }

    fn finish(&mut self) {
        self.state = WriteState::Idle;
        self.segment.clear();
        self.current.clear();
        self.block_count = 0;
    }
}
