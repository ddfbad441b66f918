// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use octopussy::gateway::handshake;
use octopussy::{Message, Record, Subscriptions};

fuzz_target!(|data: &[u8]| {
    let _ = Message::from_bytes(data);
    let _ = Record::from_bytes(data);
    let _ = Subscriptions::from_bytes(data);
    let _ = handshake::unpack(data);
});
