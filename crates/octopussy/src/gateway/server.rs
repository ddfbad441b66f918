// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! GwServerWp: listens for peers and turns accepted sockets into gateways.
//!
//! One instance per listener kind. A failed bind is announced as
//! `GW.Server.Error.Bind` and retried every `rebind_interval`; once bound, the
//! endpoint is announced as `GW.Server.Open.{Network,Local}`, and announced
//! again whenever a new peer comes up so that it learns the endpoint too.

use std::io;
use std::net::SocketAddr;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};

use mio::event::Source;
use mio::net::{TcpListener, UnixListener};
use socket2::{Domain, Protocol, Socket, Type};

use super::config::GatewayConfig;
use super::gateway_wp::GatewayWp;
use super::stream::Transport;
use super::{server_error_bind, server_error_fatal, server_open_kind};
use crate::address::Scope;
use crate::aid::{
    AtomicId, AID_GW, AID_GW_SERVER_WP, AID_HOST, AID_PORT, AID_REMOTE, AID_REOPEN, AID_TEXT,
    AID_UP,
};
use crate::hiid::Hiid;
use crate::message::{Message, MessageRef};
use crate::record::Record;
use crate::wp::{Delivery, InputFlags, InputId, TimerMode, WorkProcess, WpContext};

/// TCP listen backlog.
const LISTEN_BACKLOG: i32 = 128;

/// Which socket family a server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    /// TCP on all interfaces.
    Tcp,
    /// Unix domain socket on the local host.
    Unix,
}

enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    fn accept(&self) -> io::Result<(Transport, String)> {
        match self {
            Listener::Tcp(l) => {
                let (stream, addr) = l.accept()?;
                Ok((Transport::Tcp(stream), addr.to_string()))
            }
            Listener::Unix(l) => {
                let (stream, _) = l.accept()?;
                Ok((Transport::Unix(stream), "unix".to_string()))
            }
        }
    }

    fn source(&mut self) -> &mut dyn Source {
        match self {
            Listener::Tcp(l) => l,
            Listener::Unix(l) => l,
        }
    }
}

/// Listening work process.
pub struct GwServerWp {
    kind: ListenerKind,
    config: GatewayConfig,
    listener: Option<Listener>,
    input: Option<InputId>,
    /// Announced `(host, port)`: hostname and port, or socket path and -1.
    bound: Option<(String, i64)>,
    /// Socket file created by this server.
    socket_file: Option<PathBuf>,
    accepted: u64,
    bind_failures: u64,
}

impl GwServerWp {
    pub fn new(kind: ListenerKind, config: &GatewayConfig) -> Self {
        Self {
            kind,
            config: config.clone(),
            listener: None,
            input: None,
            bound: None,
            socket_file: None,
            accepted: 0,
            bind_failures: 0,
        }
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Bound port (TCP) once listening.
    pub fn local_port(&self) -> Option<u16> {
        match (&self.listener, self.kind) {
            (Some(Listener::Tcp(l)), ListenerKind::Tcp) => l.local_addr().ok().map(|a| a.port()),
            _ => None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.input.is_some()
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    fn describe(&self) -> (String, i64) {
        match self.kind {
            ListenerKind::Tcp => ("0.0.0.0".to_string(), i64::from(self.config.effective_port())),
            ListenerKind::Unix => (self.config.effective_socket_path().display().to_string(), -1),
        }
    }

    fn bind(&mut self, ctx: &WpContext<'_>) -> io::Result<(Listener, (String, i64))> {
        match self.kind {
            ListenerKind::Tcp => {
                let listener = bind_tcp(self.config.effective_port())?;
                let port = listener.local_addr()?.port();
                Ok((Listener::Tcp(listener), (ctx.context().hostname().to_string(), i64::from(port))))
            }
            ListenerKind::Unix => {
                let path = self.config.effective_socket_path();
                let listener = bind_unix(&path)?;
                self.socket_file = Some(path.clone());
                Ok((Listener::Unix(listener), (path.display().to_string(), -1)))
            }
        }
    }

    fn open(&mut self, ctx: &mut WpContext<'_>) {
        let (mut listener, endpoint) = match self.bind(ctx) {
            Ok(bound) => bound,
            Err(e) => {
                self.bind_failures += 1;
                let (host, port) = self.describe();
                if self.bind_failures == 1 {
                    log::warn!(
                        "[gw-server] bind {}:{} failed: {}; retrying every {:?}",
                        host,
                        port,
                        e,
                        self.config.rebind_interval
                    );
                } else {
                    log::debug!("[gw-server] bind {}:{} failed again: {}", host, port, e);
                }
                self.publish_error(server_error_bind(), &e, ctx);
                ctx.add_timeout(self.config.rebind_interval, AID_REOPEN, TimerMode::OneShot);
                return;
            }
        };
        match ctx.add_input(listener.source(), InputFlags::READ) {
            Ok(input) => self.input = Some(input),
            Err(e) => {
                log::error!("[gw-server] cannot watch listener: {}", e);
                self.publish_error(server_error_fatal(), &e, ctx);
                ctx.add_timeout(self.config.rebind_interval, AID_REOPEN, TimerMode::OneShot);
                return;
            }
        }
        log::info!("[gw-server] listening on {}:{}", endpoint.0, endpoint.1);
        self.bind_failures = 0;
        self.listener = Some(listener);
        self.bound = Some(endpoint);
        self.announce(ctx);
    }

    fn announce(&self, ctx: &mut WpContext<'_>) {
        if let Some((host, port)) = &self.bound {
            let msg = Message::new(server_open_kind(self.kind))
                .with_payload(Record::new().with(AID_HOST, host.as_str()).with(AID_PORT, *port));
            ctx.publish(msg, Scope::Global);
        }
    }

    fn publish_error(&self, id: Hiid, err: &io::Error, ctx: &mut WpContext<'_>) {
        let (host, port) = self.describe();
        let msg = Message::new(id).with_payload(
            Record::new()
                .with(AID_HOST, host)
                .with(AID_PORT, port)
                .with(AID_TEXT, err.to_string()),
        );
        ctx.publish(msg, Scope::Local);
    }

    fn close(&mut self, ctx: &mut WpContext<'_>) {
        if let (Some(mut listener), Some(input)) = (self.listener.take(), self.input.take()) {
            if let Err(e) = ctx.remove_input(listener.source(), input) {
                log::debug!("[gw-server] deregister listener: {}", e);
            }
        }
        self.bound = None;
        if let Some(path) = self.socket_file.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::debug!("[gw-server] remove {}: {}", path.display(), e);
            }
        }
    }

    fn accept_all(&mut self, ctx: &mut WpContext<'_>) -> Delivery {
        loop {
            let Some(listener) = &self.listener else {
                return Delivery::Cancel;
            };
            match listener.accept() {
                Ok((stream, from)) => {
                    self.accepted += 1;
                    log::info!("[gw-server] accepted connection from {}", from);
                    ctx.attach(Box::new(GatewayWp::new(stream, &self.config)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Delivery::Accept,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::error!("[gw-server] accept failed: {}; reopening", e);
                    self.publish_error(server_error_fatal(), &e, ctx);
                    self.close(ctx);
                    ctx.add_timeout(self.config.rebind_interval, AID_REOPEN, TimerMode::OneShot);
                    return Delivery::Cancel;
                }
            }
        }
    }
}

impl WorkProcess for GwServerWp {
    fn class(&self) -> AtomicId {
        AID_GW_SERVER_WP
    }

    fn init(&mut self, ctx: &mut WpContext<'_>) {
        ctx.subscribe(
            Hiid::from([AID_GW, AID_REMOTE, AID_UP, AtomicId::WILDCARD]),
            Scope::Local,
        );
    }

    fn start(&mut self, ctx: &mut WpContext<'_>) -> bool {
        self.open(ctx);
        false
    }

    fn stop(&mut self, ctx: &mut WpContext<'_>) {
        self.close(ctx);
    }

    fn receive(&mut self, _msg: &MessageRef, ctx: &mut WpContext<'_>) -> Delivery {
        // A new peer came up: tell it (and everyone) where we listen.
        self.announce(ctx);
        Delivery::Accept
    }

    fn timeout(&mut self, id: &Hiid, ctx: &mut WpContext<'_>) -> Delivery {
        if *id == Hiid::from(AID_REOPEN) && self.listener.is_none() {
            self.open(ctx);
        }
        Delivery::Cancel
    }

    fn input(&mut self, _input: InputId, _flags: InputFlags, ctx: &mut WpContext<'_>) -> Delivery {
        self.accept_all(ctx)
    }
}

fn bind_tcp(port: u16) -> io::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    let listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(listener))
}

/// Bind a Unix listener, replacing a stale socket file but never a live one.
fn bind_unix(path: &Path) -> io::Result<UnixListener> {
    if path.exists() {
        if StdUnixStream::connect(path).is_ok() {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} is in use by a running server", path.display()),
            ));
        }
        log::debug!("[gw-server] removing stale socket {}", path.display());
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_unix_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gw.sock");
        std::fs::write(&path, b"").unwrap();
        let listener = bind_unix(&path).unwrap();
        // A live listener is not replaced.
        let err = bind_unix(&path).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
        drop(listener);
    }

    #[test]
    fn test_bind_tcp_reports_port() {
        let listener = bind_tcp(0).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
