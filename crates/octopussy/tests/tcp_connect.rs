// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server and client gateways over real sockets.

mod common;

use std::time::Duration;

use common::*;
use octopussy::gateway::{init_gateways_with, Endpoint, GwClientWp, GwServerWp};
use octopussy::{AtomicId, Hiid, Message, Scope};

fn free_port() -> u16 {
    let spare = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind spare listener");
    spare.local_addr().expect("Failed to read spare address").port()
}

#[test]
fn test_client_reaches_tcp_server() {
    let port = free_port();

    let mut server = dispatcher(1, 1);
    let server_config = fast_config()
        .with_listeners(true, false)
        .with_tcp_port(port)
        .with_follow_announcements(false);
    let gateways = init_gateways_with(&mut server, &server_config).expect("Failed to init gateways");
    assert_eq!(gateways.len(), 2);
    server.start().expect("Failed to start server");
    let listener = server
        .wp::<GwServerWp>(&gateways[0])
        .expect("server missing");
    assert!(listener.is_listening());
    assert_eq!(listener.local_port(), Some(port));

    let mut client = dispatcher(2, 2);
    let sink = client.attach(Box::new(Collector::new(&[("A.*", Scope::Global)])));
    let client_config = fast_config().with_peer(Endpoint::tcp("127.0.0.1", port));
    let client_wp = client.attach(Box::new(GwClientWp::new(&client_config)));
    client.start().expect("Failed to start client");

    let server_id = Hiid::from([AtomicId::new(1), AtomicId::new(1)]);
    let client_id = Hiid::from([AtomicId::new(2), AtomicId::new(2)]);
    let linked = pump_until(&mut [&mut server, &mut client], Duration::from_secs(10), |d| {
        d[0].peers().contains(&client_id) && d[1].peers().contains(&server_id)
    });
    assert!(linked, "TCP link was not established");

    let info = client.peers().get(&server_id).expect("peer missing");
    assert_eq!(info.port, i64::from(port));
    assert_eq!(
        client
            .wp::<GwClientWp>(&client_wp)
            .expect("client missing")
            .connected_total(),
        1
    );
    assert_eq!(
        server
            .wp::<GwServerWp>(&gateways[0])
            .expect("server missing")
            .accepted(),
        1
    );

    server.publish(Message::new(hiid("A.B")), Scope::Global);
    let arrived = pump_until(&mut [&mut server, &mut client], Duration::from_secs(5), |d| {
        !collector(&d[1], &sink).matching(&hiid("A.B")).is_empty()
    });
    assert!(arrived, "publish did not cross the TCP link");
}

#[test]
fn test_client_reaches_unix_server_and_reconnects() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("gw.sock");

    let mut client = dispatcher(2, 2);
    let client_config = fast_config().with_peer(Endpoint::unix(&path));
    let client_wp = client.attach(Box::new(GwClientWp::new(&client_config)));
    client.start().expect("Failed to start client");

    // Nobody listens yet: the client keeps retrying.
    pump(&mut [&mut client], 10);
    assert!(client.peers().is_empty());

    let mut server = dispatcher(1, 1);
    let server_config = fast_config()
        .with_listeners(false, true)
        .with_socket_path(&path)
        .with_follow_announcements(false);
    init_gateways_with(&mut server, &server_config).expect("Failed to init gateways");
    server.start().expect("Failed to start server");

    let server_id = Hiid::from([AtomicId::new(1), AtomicId::new(1)]);
    let linked = pump_until(&mut [&mut server, &mut client], Duration::from_secs(10), |d| {
        d[1].peers().contains(&server_id)
    });
    assert!(linked, "client never connected to the Unix server");
    let info = client.peers().get(&server_id).expect("peer missing");
    assert_eq!(info.port, -1);

    // Server goes away, then comes back.
    drop(server);
    let lost = pump_until(&mut [&mut client], Duration::from_secs(5), |d| {
        d[0].peers().is_empty()
    });
    assert!(lost, "client did not notice the lost server");

    let mut server = dispatcher(1, 1);
    init_gateways_with(&mut server, &server_config).expect("Failed to init gateways");
    server.start().expect("Failed to start server");
    let relinked = pump_until(&mut [&mut server, &mut client], Duration::from_secs(10), |d| {
        d[1].peers().contains(&server_id)
    });
    assert!(relinked, "client did not reconnect");
    assert_eq!(
        client
            .wp::<GwClientWp>(&client_wp)
            .expect("client missing")
            .connected_total(),
        2
    );
}
