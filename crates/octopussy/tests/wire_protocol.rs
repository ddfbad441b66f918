// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Framing: messages through writer and reader, split and corrupted streams.

mod common;

use common::*;
use octopussy::gateway::reader::{PacketReader, ReadEvent};
use octopussy::gateway::wire::{encode_data_packet, PacketType};
use octopussy::gateway::writer::{PacketWriter, WriteStatus};
use octopussy::{AtomicId, Message, MsgAddress, Record, Scope};

fn sample_message(data_len: usize) -> Message {
    let mut msg = Message::new(hiid("A.B.C"))
        .with_payload(
            Record::new()
                .with(aid("X"), 42i64)
                .with(aid("D"), "payload text"),
        )
        .with_data((0..data_len).map(|i| (i % 251) as u8).collect())
        .with_priority(10)
        .with_state(3);
    msg.from = MsgAddress::new(AtomicId::new(-5), AtomicId::new(1), AtomicId::new(7), AtomicId::new(8));
    msg.to = MsgAddress::publish(Scope::Global, AtomicId::new(7), AtomicId::new(8));
    msg.hops = 2;
    msg
}

/// Serialize `msg` into packets the way a gateway would.
fn frame(msg: &Message, max_block: usize) -> Vec<u8> {
    let blocks = msg.to_blocks(max_block).expect("Failed to split message");
    let mut writer = PacketWriter::new();
    assert!(writer.enqueue_message(blocks));
    let mut out = Vec::new();
    let status = writer.write_to(&mut out).expect("Failed to write");
    assert_eq!(status, WriteStatus::Done);
    out
}

fn read_all(reader: &mut PacketReader) -> Vec<ReadEvent> {
    std::iter::from_fn(|| reader.next_event()).collect()
}

#[test]
fn test_single_block_message_survives_framing() {
    let msg = sample_message(16);
    let bytes = frame(&msg, 64 * 1024);

    let mut reader = PacketReader::new(64 * 1024, true);
    reader.feed(&bytes);
    let events = read_all(&mut reader);
    assert_eq!(events.len(), 1);
    let ReadEvent::Message(blocks) = &events[0] else {
        panic!("expected a message, got {:?}", events[0]);
    };
    assert_eq!(blocks.len(), 1);
    let decoded = Message::from_blocks(blocks).expect("Failed to decode");
    assert_eq!(decoded, msg);
    assert_eq!(reader.stats().messages, 1);
    assert_eq!(reader.buffered(), 0);
}

#[test]
fn test_multi_block_message_fed_byte_by_byte() {
    let msg = sample_message(5000);
    let bytes = frame(&msg, 512);

    let mut reader = PacketReader::new(512, true);
    let mut events = Vec::new();
    for b in &bytes {
        reader.feed(std::slice::from_ref(b));
        events.extend(read_all(&mut reader));
    }
    assert_eq!(events.len(), 1);
    let ReadEvent::Message(blocks) = &events[0] else {
        panic!("expected a message, got {:?}", events[0]);
    };
    assert!(blocks.len() > 1);
    assert_eq!(Message::from_blocks(blocks).expect("Failed to decode"), msg);
    assert_eq!(reader.stats().blocks, blocks.len() as u64);
}

#[test]
fn test_junk_before_packet_costs_one_resync() {
    let mut rng = fastrand::Rng::with_seed(0x6f63);
    let junk: Vec<u8> = std::iter::repeat_with(|| rng.u8(..))
        .filter(|b| *b != b'o')
        .take(300)
        .collect();
    let msg = sample_message(8);

    let mut stream = junk.clone();
    stream.extend(frame(&msg, 64 * 1024));

    let mut reader = PacketReader::new(64 * 1024, true);
    reader.feed(&stream);
    let events = read_all(&mut reader);
    assert_eq!(events.len(), 1);
    let ReadEvent::Message(blocks) = &events[0] else {
        panic!("expected a message, got {:?}", events[0]);
    };
    assert_eq!(Message::from_blocks(blocks).expect("Failed to decode"), msg);
    let stats = reader.stats();
    assert_eq!(stats.resyncs, 1);
    assert_eq!(stats.junk_bytes, junk.len() as u64);
}

#[test]
fn test_corrupted_block_is_dropped_and_stream_recovers() {
    let first = sample_message(32);
    let second = sample_message(4);

    let mut bad = frame(&first, 64 * 1024);
    // Flip a byte inside the block body, past the 8-byte header.
    bad[20] ^= 0xff;
    let good = frame(&second, 64 * 1024);

    let mut reader = PacketReader::new(64 * 1024, true);
    reader.feed(&bad);
    reader.feed(&good);
    let events = read_all(&mut reader);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], ReadEvent::ChecksumFailed);
    let ReadEvent::Message(blocks) = &events[1] else {
        panic!("expected a message, got {:?}", events[1]);
    };
    assert_eq!(Message::from_blocks(blocks).expect("Failed to decode"), second);
    assert_eq!(reader.stats().checksum_failures, 1);
}

#[test]
fn test_unverified_reader_accepts_bad_checksum() {
    let msg = sample_message(0);
    let blocks = msg.to_blocks(64 * 1024).expect("Failed to split message");
    assert_eq!(blocks.len(), 1);
    let mut packet = encode_data_packet(&blocks[0], 0, 1);
    let len = packet.len();
    // Checksum is the middle word of the trailer.
    packet[len - 8..len - 4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

    let mut reader = PacketReader::new(64 * 1024, false);
    reader.feed(&packet);
    assert!(matches!(reader.next_event(), Some(ReadEvent::Message(_))));
}

#[test]
fn test_control_packets_between_messages() {
    let msg = sample_message(0);
    let mut writer = PacketWriter::new();
    let mut out = Vec::new();

    assert!(writer.queue_control(PacketType::Ping));
    writer.write_to(&mut out).expect("Failed to write");
    assert!(writer.enqueue_message(msg.to_blocks(1024).expect("Failed to split")));
    // A control packet never cuts into a message in flight.
    assert!(!writer.queue_control(PacketType::Ack));
    writer.write_to(&mut out).expect("Failed to write");
    assert!(writer.queue_control(PacketType::Ack));
    writer.write_to(&mut out).expect("Failed to write");

    let mut reader = PacketReader::new(1024, true);
    reader.feed(&out);
    let events = read_all(&mut reader);
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], ReadEvent::Ping);
    assert!(matches!(events[1], ReadEvent::Message(_)));
    assert_eq!(events[2], ReadEvent::Ack);
    assert_eq!(reader.stats().pings, 1);
    assert_eq!(writer.stats().messages, 1);
}
