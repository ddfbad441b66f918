// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire codec benchmark
//!
//! Cost of turning a message into packets and back:
//! - message serialization into blocks
//! - packet writer into a memory buffer
//! - packet reader reassembly and decode

#![allow(clippy::uninlined_format_args)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use octopussy::gateway::reader::{PacketReader, ReadEvent};
use octopussy::gateway::writer::PacketWriter;
use octopussy::{AtomicId, Message, MsgAddress, Record, Scope};

const MAX_BLOCK: usize = 64 * 1024;

fn message(size: usize) -> Message {
    let mut msg = Message::new([AtomicId::new(10), AtomicId::new(20), AtomicId::new(30)])
        .with_payload(Record::new().with(AtomicId::new(40), 7i64))
        .with_data(vec![0x5a; size]);
    msg.from = MsgAddress::new(AtomicId::new(-5), AtomicId::new(1), AtomicId::new(2), AtomicId::new(3));
    msg.to = MsgAddress::publish(Scope::Global, AtomicId::new(2), AtomicId::new(3));
    msg
}

fn frame(msg: &Message) -> Vec<u8> {
    let mut writer = PacketWriter::new();
    writer.enqueue_message(msg.to_blocks(MAX_BLOCK).expect("serialize"));
    let mut out = Vec::new();
    writer.write_to(&mut out).expect("write");
    out
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_encode");
    for size in [64usize, 4 * 1024, 256 * 1024] {
        let msg = message(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &msg, |b, msg| {
            b.iter(|| black_box(frame(black_box(msg))));
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_decode");
    for size in [64usize, 4 * 1024, 256 * 1024] {
        let bytes = frame(&message(size));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &bytes, |b, bytes| {
            b.iter(|| {
                let mut reader = PacketReader::new(MAX_BLOCK, true);
                reader.feed(black_box(bytes));
                match reader.next_event() {
                    Some(ReadEvent::Message(blocks)) => {
                        black_box(Message::from_blocks(&blocks).expect("decode"));
                    }
                    other => panic!("unexpected event {:?}", other),
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
