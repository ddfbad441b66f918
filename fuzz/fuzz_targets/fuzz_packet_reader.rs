// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use octopussy::gateway::reader::{PacketReader, ReadEvent};
use octopussy::Message;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes, fed in uneven chunks
    let mut reader = PacketReader::new(4096, true);
    for chunk in data.chunks(97) {
        reader.feed(chunk);
        while let Some(event) = reader.next_event() {
            if let ReadEvent::Message(blocks) = event {
                let _ = Message::from_blocks(&blocks);
            }
        }
    }
});
