// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Incremental packet reader.
//!
//! Bytes from the socket are pushed with [`PacketReader::feed`]; complete
//! events are pulled with [`PacketReader::next_event`]. The reader never
//! fails: a bad header starts a resynchronization scan for the next `'o'`,
//! checksum and block-count errors drop the message being assembled, and a
//! message growing past the size limit is discarded up to its final block.
//!
//! ```text
//!          bad header: skip to next 'o'
//!            +------+
//!            v      |
//!   +------> HEADER-+---- DATA ----> BLOCK ----> TRAILER ---+
//!   |          |                                            |
//!   |          +-- PING/ACK/RETRY: event                    |
//!   +-------------------------------------------------------+
//! ```

use std::fmt;

use super::wire::{checksum, PacketHeader, PacketTrailer, PacketType, HEADER_SIZE, TRAILER_SIZE};

/// Compact the input buffer once this many consumed bytes accumulate.
const COMPACT_THRESHOLD: usize = 64 * 1024;

/// Default message size limit, in blocks of the maximum size.
pub const DEFAULT_MAX_BLOCKS_PER_MESSAGE: usize = 256;

/// Read state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Header,
    Block,
    Trailer,
}

impl fmt::Display for ReadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadState::Header => write!(f, "HEADER"),
            ReadState::Block => write!(f, "BLOCK"),
            ReadState::Trailer => write!(f, "TRAILER"),
        }
    }
}

/// Something the reader recognized in the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// All blocks of one message, in order.
    Message(Vec<Vec<u8>>),
    Ping,
    Ack,
    /// The peer asked for a retransmission.
    RetryRequested,
    /// A block failed its checksum; the partial message was dropped.
    ChecksumFailed,
}

/// Reader counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub packets: u64,
    pub blocks: u64,
    pub messages: u64,
    pub pings: u64,
    pub bytes: u64,
    /// Number of junk runs skipped (one per loss of sync).
    pub resyncs: u64,
    pub junk_bytes: u64,
    pub checksum_failures: u64,
    /// Trailers whose block count disagreed with the blocks received.
    pub size_mismatches: u64,
    /// Messages dropped for exceeding the size limit.
    pub oversized: u64,
    pub seq_gaps: u64,
}

/// Packet reader for one connection.
#[derive(Debug)]
pub struct PacketReader {
    state: ReadState,
    buf: Vec<u8>,
    pos: usize,
    header: PacketHeader,
    block: Vec<u8>,
    blocks: Vec<Vec<u8>>,
    /// Bytes held in `blocks`.
    pending_bytes: usize,
    /// Dropping the rest of an oversized message.
    discarding: bool,
    max_block_size: usize,
    max_message_size: usize,
    verify_checksum: bool,
    in_junk: bool,
    expected_seq: Option<u32>,
    stats: ReaderStats,
}

impl PacketReader {
    pub fn new(max_block_size: usize, verify_checksum: bool) -> Self {
        Self {
            state: ReadState::Header,
            buf: Vec::with_capacity(16 * 1024),
            pos: 0,
            header: PacketHeader::new(PacketType::Ping, 0),
            block: Vec::new(),
            blocks: Vec::new(),
            pending_bytes: 0,
            discarding: false,
            max_block_size,
            max_message_size: max_block_size.saturating_mul(DEFAULT_MAX_BLOCKS_PER_MESSAGE),
            verify_checksum,
            in_junk: false,
            expected_seq: None,
            stats: ReaderStats::default(),
        }
    }

    /// Limit on the total block bytes of one message.
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn state(&self) -> ReadState {
        self.state
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Blocks of a message still being assembled.
    pub fn pending_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Append bytes read from the socket.
    pub fn feed(&mut self, data: &[u8]) {
        if self.pos >= COMPACT_THRESHOLD || (self.pos > 0 && self.pos == self.buf.len()) {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(data);
        self.stats.bytes += data.len() as u64;
    }

    /// Drop all partial state, e.g. after the connection was reset.
    pub fn reset(&mut self) {
        self.state = ReadState::Header;
        self.buf.clear();
        self.pos = 0;
        self.block.clear();
        self.blocks.clear();
        self.pending_bytes = 0;
        self.discarding = false;
        self.in_junk = false;
        self.expected_seq = None;
    }

    /// Next complete event, or `None` if more bytes are needed.
    pub fn next_event(&mut self) -> Option<ReadEvent> {
        loop {
            let avail = &self.buf[self.pos..];
            match self.state {
                ReadState::Header => {
                    let window = &avail[..avail.len().min(HEADER_SIZE)];
                    match PacketHeader::decode(window, self.max_block_size) {
                        Ok(None) => return None,
                        Ok(Some(header)) => {
                            if self.in_junk {
                                self.in_junk = false;
                                log::info!("[gateway] packet stream resynchronized");
                            }
                            self.pos += HEADER_SIZE;
                            if let Some(event) = self.on_header(header) {
                                return Some(event);
                            }
                        }
                        Err(reason) => self.skip_junk(&reason.to_string()),
                    }
                }
                ReadState::Block => {
                    let need = self.header.content as usize - self.block.len();
                    let take = need.min(avail.len());
                    self.block.extend_from_slice(&avail[..take]);
                    self.pos += take;
                    if self.block.len() < self.header.content as usize {
                        return None;
                    }
                    self.state = ReadState::Trailer;
                }
                ReadState::Trailer => {
                    let trailer = PacketTrailer::decode(avail)?;
                    self.pos += TRAILER_SIZE;
                    self.state = ReadState::Header;
                    if let Some(event) = self.on_trailer(trailer) {
                        return Some(event);
                    }
                }
            }
        }
    }

    fn on_header(&mut self, header: PacketHeader) -> Option<ReadEvent> {
        self.stats.packets += 1;
        match header.kind {
            PacketType::Ping => {
                self.stats.pings += 1;
                Some(ReadEvent::Ping)
            }
            PacketType::Ack => Some(ReadEvent::Ack),
            PacketType::Retry => Some(ReadEvent::RetryRequested),
            PacketType::Data => {
                self.header = header;
                self.block = Vec::with_capacity(header.content as usize);
                self.state = ReadState::Block;
                None
            }
        }
    }

    /// Skip the bad byte at the cursor and everything up to the next `'o'`.
    fn skip_junk(&mut self, reason: &str) {
        if !self.in_junk {
            self.in_junk = true;
            self.stats.resyncs += 1;
            log::warn!("[gateway] bad packet header ({}), resynchronizing", reason);
        }
        let avail = &self.buf[self.pos..];
        let skip = match avail.iter().skip(1).position(|&b| b == SIGNATURE_START) {
            Some(i) => i + 1,
            None => avail.len(),
        };
        self.pos += skip;
        self.stats.junk_bytes += skip as u64;
    }

    fn on_trailer(&mut self, trailer: PacketTrailer) -> Option<ReadEvent> {
        if let Some(expected) = self.expected_seq {
            if trailer.seq != expected {
                self.stats.seq_gaps += 1;
                log::warn!(
                    "[gateway] sequence gap: expected {}, got {}",
                    expected,
                    trailer.seq
                );
            }
        }
        self.expected_seq = Some(trailer.seq.wrapping_add(1));

        let block = std::mem::take(&mut self.block);
        if self.verify_checksum {
            let sum = checksum(&block);
            if sum != trailer.checksum {
                self.stats.checksum_failures += 1;
                log::warn!(
                    "[gateway] checksum mismatch on seq {} ({:#010x} != {:#010x}), dropping {} blocks",
                    trailer.seq,
                    sum,
                    trailer.checksum,
                    self.blocks.len() + 1
                );
                self.blocks.clear();
                self.pending_bytes = 0;
                return Some(ReadEvent::ChecksumFailed);
            }
        }

        self.stats.blocks += 1;
        if self.discarding {
            if trailer.msgsize != 0 {
                self.discarding = false;
            }
            return None;
        }
        self.pending_bytes += block.len();
        if self.pending_bytes > self.max_message_size {
            self.stats.oversized += 1;
            log::error!(
                "[gateway] message exceeds {} bytes after {} blocks, dropping",
                self.max_message_size,
                self.blocks.len() + 1
            );
            self.blocks.clear();
            self.pending_bytes = 0;
            self.discarding = trailer.msgsize == 0;
            return None;
        }
        self.blocks.push(block);
        if trailer.msgsize == 0 {
            return None;
        }
        self.pending_bytes = 0;
        if trailer.msgsize as usize != self.blocks.len() {
            self.stats.size_mismatches += 1;
            log::error!(
                "[gateway] message claims {} blocks but {} were received, dropping",
                trailer.msgsize,
                self.blocks.len()
            );
            self.blocks.clear();
            return None;
        }
        self.stats.messages += 1;
        Some(ReadEvent::Message(std::mem::take(&mut self.blocks)))
    }
}

const SIGNATURE_START: u8 = super::wire::SIGNATURE[0];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::wire::encode_data_packet;

    fn reader() -> PacketReader {
        PacketReader::new(1024, true)
    }

    #[test]
    fn test_single_block_message() {
        let mut r = reader();
        r.feed(&encode_data_packet(b"abc", 0, 1));
        assert_eq!(r.next_event(), Some(ReadEvent::Message(vec![b"abc".to_vec()])));
        assert_eq!(r.next_event(), None);
        assert_eq!(r.stats().messages, 1);
    }

    #[test]
    fn test_byte_by_byte() {
        let mut r = reader();
        let mut pkt = encode_data_packet(b"one", 0, 0);
        pkt.extend(encode_data_packet(b"two", 1, 2));
        let mut got = Vec::new();
        for b in pkt {
            r.feed(&[b]);
            while let Some(ev) = r.next_event() {
                got.push(ev);
            }
        }
        assert_eq!(
            got,
            vec![ReadEvent::Message(vec![b"one".to_vec(), b"two".to_vec()])]
        );
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn test_ping_and_control() {
        let mut r = reader();
        r.feed(&PacketHeader::new(PacketType::Ping, 0).encode());
        r.feed(&PacketHeader::new(PacketType::Retry, 0).encode());
        assert_eq!(r.next_event(), Some(ReadEvent::Ping));
        assert_eq!(r.next_event(), Some(ReadEvent::RetryRequested));
        assert_eq!(r.stats().pings, 1);
    }

    #[test]
    fn test_resync_counts_once() {
        let mut r = reader();
        r.feed(b"xxxxxxxxxxxxxxxxxxxx");
        r.feed(&encode_data_packet(b"ok", 0, 1));
        assert_eq!(r.next_event(), Some(ReadEvent::Message(vec![b"ok".to_vec()])));
        assert_eq!(r.stats().resyncs, 1);
        assert_eq!(r.stats().junk_bytes, 20);
    }

    #[test]
    fn test_resync_on_false_signature_start() {
        // 'o' inside the junk but not followed by "Ms"
        let mut r = reader();
        r.feed(b"zzoopsoM!");
        r.feed(&encode_data_packet(b"ok", 0, 1));
        assert_eq!(r.next_event(), Some(ReadEvent::Message(vec![b"ok".to_vec()])));
        assert_eq!(r.stats().resyncs, 1);
        assert_eq!(r.stats().junk_bytes, 9);
    }

    #[test]
    fn test_oversized_header_resyncs() {
        let mut r = PacketReader::new(4, true);
        r.feed(&encode_data_packet(b"toolong", 0, 1));
        r.feed(&encode_data_packet(b"ok", 1, 1));
        assert_eq!(r.next_event(), Some(ReadEvent::Message(vec![b"ok".to_vec()])));
        assert_eq!(r.stats().resyncs, 1);
    }

    #[test]
    fn test_checksum_failure_drops_message() {
        let mut r = reader();
        let mut bad = encode_data_packet(b"abc", 0, 0);
        bad[HEADER_SIZE] ^= 0xFF;
        r.feed(&bad);
        r.feed(&encode_data_packet(b"def", 1, 2));
        assert_eq!(r.next_event(), Some(ReadEvent::ChecksumFailed));
        // second block arrives alone and claims 2 blocks: size mismatch
        assert_eq!(r.next_event(), None);
        assert_eq!(r.stats().checksum_failures, 1);
        assert_eq!(r.stats().size_mismatches, 1);
        assert_eq!(r.pending_blocks(), 0);
    }

    #[test]
    fn test_checksum_not_verified_when_disabled() {
        let mut r = PacketReader::new(1024, false);
        let mut pkt = encode_data_packet(b"abc", 0, 1);
        pkt[HEADER_SIZE + 3 + 4] ^= 0xFF; // corrupt the checksum field
        r.feed(&pkt);
        assert!(matches!(r.next_event(), Some(ReadEvent::Message(_))));
    }

    #[test]
    fn test_sequence_gap_logged_not_fatal() {
        let mut r = reader();
        r.feed(&encode_data_packet(b"a", 5, 1));
        r.feed(&encode_data_packet(b"b", 9, 1));
        assert!(r.next_event().is_some());
        assert!(r.next_event().is_some());
        assert_eq!(r.stats().seq_gaps, 1);
    }

    #[test]
    fn test_unterminated_message_is_capped() {
        let mut r = PacketReader::new(4, true).with_max_message_size(10);
        for seq in 0..100 {
            r.feed(&encode_data_packet(b"abcd", seq, 0));
            assert_eq!(r.next_event(), None);
            assert!(r.pending_blocks() <= 2);
        }
        // The final block closes the dropped message without delivering it.
        r.feed(&encode_data_packet(b"end", 100, 101));
        assert_eq!(r.next_event(), None);
        assert_eq!(r.stats().oversized, 1);
        assert_eq!(r.pending_blocks(), 0);

        r.feed(&encode_data_packet(b"ok", 101, 1));
        assert_eq!(r.next_event(), Some(ReadEvent::Message(vec![b"ok".to_vec()])));
        assert_eq!(r.stats().size_mismatches, 0);
    }

    #[test]
    fn test_message_at_limit_is_delivered() {
        let mut r = PacketReader::new(4, true).with_max_message_size(8);
        r.feed(&encode_data_packet(b"abcd", 0, 0));
        r.feed(&encode_data_packet(b"efgh", 1, 2));
        assert_eq!(
            r.next_event(),
            Some(ReadEvent::Message(vec![b"abcd".to_vec(), b"efgh".to_vec()]))
        );
        assert_eq!(r.stats().oversized, 0);
    }
}
