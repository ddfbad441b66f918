// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A second connection to an already connected peer is dropped.

mod common;

use std::time::Duration;

use common::*;
use octopussy::gateway::{remote_duplicate, GatewayWp, PeerState};
use octopussy::{AtomicId, Hiid, MsgAddress, Scope, WorkProcess, WpContext};

/// Holds enough long subscriptions to make the handshake larger than a
/// socket buffer.
struct Crowd;

impl Crowd {
    const MASKS: i32 = 6000;
    const DEPTH: usize = 64;
}

impl WorkProcess for Crowd {
    fn class(&self) -> AtomicId {
        AtomicId::new(-7005)
    }

    fn init(&mut self, ctx: &mut WpContext<'_>) {
        let head = aid("A");
        for i in 1..=Self::MASKS {
            let mut mask = Hiid::from([head, AtomicId::new(i)]);
            while mask.len() < Self::DEPTH {
                mask.push(AtomicId::new(i));
            }
            ctx.subscribe(mask, Scope::Global);
        }
    }
}

#[test]
fn test_second_link_to_same_peer_is_closed() {
    let mut s = dispatcher(1, 1);
    let mut p1 = dispatcher(2, 2);
    let mut p2 = dispatcher(2, 2);
    let watcher = s.attach(Box::new(Collector::new(&[("GW.Remote.*", Scope::Local)])));
    p1.attach(Box::new(Collector::new(&[("A.*", Scope::Global)])));
    p2.attach(Box::new(Collector::new(&[("A.*", Scope::Global)])));
    p2.attach(Box::new(Collector::new(&[("C.*", Scope::Global)])));
    s.start().expect("Failed to start s");
    p1.start().expect("Failed to start p1");
    p2.start().expect("Failed to start p2");

    let (first, _) = connect(&mut s, &mut p1);
    let routes_before: Vec<MsgAddress> = s
        .wp::<GatewayWp>(&first)
        .expect("gateway missing")
        .remote_subs()
        .keys()
        .copied()
        .collect();
    assert_eq!(routes_before.len(), 1);

    let (second, _) = link(&mut s, &mut p2, &fast_config());
    let peer = Hiid::from([AtomicId::new(2), AtomicId::new(2)]);
    let duplicate = remote_duplicate(&peer);
    let closed = pump_until(&mut [&mut s, &mut p2], Duration::from_secs(5), |d| {
        d[0].state_of(&second).is_none()
            && !collector(&d[0], &watcher).matching(&duplicate).is_empty()
    });
    assert!(closed, "duplicate connection was not closed");

    assert_eq!(peer_state(&s, &first), Some(PeerState::Connected));
    let routes_after: Vec<MsgAddress> = s
        .wp::<GatewayWp>(&first)
        .expect("gateway missing")
        .remote_subs()
        .keys()
        .copied()
        .collect();
    assert_eq!(routes_after, routes_before);
    assert_eq!(s.peers().len(), 1);
    assert_eq!(s.peers().get(&peer).map(|p| p.gateway), Some(first));
    assert_eq!(s.forwarders(), vec![first]);
    assert_eq!(collector(&s, &watcher).matching(&duplicate).len(), 1);
}

#[test]
fn test_link_to_self_is_refused() {
    let mut a = dispatcher(1, 1);
    let mut twin = dispatcher(1, 1);
    a.start().expect("Failed to start");
    twin.start().expect("Failed to start");

    let (ga, gb) = link(&mut a, &mut twin, &fast_config());
    let closed = pump_until(&mut [&mut a, &mut twin], Duration::from_secs(5), |d| {
        d[0].state_of(&ga).is_none() && d[1].state_of(&gb).is_none()
    });
    assert!(closed, "self connection stayed open");
    assert!(a.peers().is_empty());
    assert!(a.forwarders().is_empty());
}

#[test]
fn test_duplicate_closed_after_write_in_flight() {
    let mut s = dispatcher(1, 1);
    let mut p1 = dispatcher(2, 2);
    let mut p2 = dispatcher(2, 2);
    s.attach(Box::new(Crowd));
    let watcher = s.attach(Box::new(Collector::new(&[("GW.Remote.*", Scope::Local)])));
    s.start().expect("Failed to start s");
    p1.start().expect("Failed to start p1");
    p2.start().expect("Failed to start p2");
    let (first, _) = connect(&mut s, &mut p1);

    // p2 is not polled yet, so our large handshake is stuck half written.
    let (second, _) = link(&mut s, &mut p2, &fast_config());
    let peer = Hiid::from([AtomicId::new(2), AtomicId::new(2)]);
    let duplicate = remote_duplicate(&peer);
    let noticed = pump_until(&mut [&mut s], Duration::from_secs(5), |d| {
        !collector(&d[0], &watcher).matching(&duplicate).is_empty()
    });
    assert!(noticed, "duplicate peer not detected");
    assert_eq!(peer_state(&s, &second), Some(PeerState::Closing));
    assert!(s.state_of(&second).is_some());

    // Draining the socket lets the write finish; only then is it dropped.
    let closed = pump_until(&mut [&mut s, &mut p2], Duration::from_secs(10), |d| {
        d[0].state_of(&second).is_none()
    });
    assert!(closed, "duplicate gateway never finished closing");
    assert_eq!(peer_state(&s, &first), Some(PeerState::Connected));
    assert_eq!(s.peers().len(), 1);
    assert_eq!(s.peers().get(&peer).map(|p| p.gateway), Some(first));
    assert_eq!(collector(&s, &watcher).matching(&duplicate).len(), 1);
}
