// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway transport: a TCP or Unix stream behind one type.
//!
//! Both variants are non-blocking mio streams, so a gateway can register
//! its [`Transport`] with the dispatcher and drive it from readiness events
//! without knowing which kind of socket it owns.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::Shutdown;

use mio::event::Source;
use mio::net::{TcpStream, UnixStream};
use mio::{Interest, Registry, Token};

/// A connected, non-blocking byte stream.
pub enum Transport {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Transport {
    /// Human-readable peer description for logs and the peer list.
    pub fn peer_label(&self) -> (String, i64) {
        match self {
            Transport::Tcp(s) => match s.peer_addr() {
                Ok(addr) => (addr.ip().to_string(), i64::from(addr.port())),
                Err(_) => ("unknown".to_string(), -1),
            },
            Transport::Unix(s) => {
                let path = s
                    .peer_addr()
                    .ok()
                    .and_then(|a| a.as_pathname().map(|p| p.display().to_string()))
                    .or_else(|| {
                        s.local_addr()
                            .ok()
                            .and_then(|a| a.as_pathname().map(|p| p.display().to_string()))
                    })
                    .unwrap_or_else(|| "unix".to_string());
                (path, -1)
            }
        }
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, Transport::Unix(_))
    }

    /// Pending socket error, e.g. the outcome of a non-blocking connect.
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        match self {
            Transport::Tcp(s) => s.take_error(),
            Transport::Unix(s) => s.take_error(),
        }
    }

    /// True once a non-blocking connect has completed.
    pub fn is_connected(&self) -> bool {
        match self {
            Transport::Tcp(s) => s.peer_addr().is_ok(),
            Transport::Unix(s) => s.peer_addr().is_ok(),
        }
    }

    /// TCP_NODELAY; a no-op on Unix sockets.
    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        match self {
            Transport::Tcp(s) => s.set_nodelay(nodelay),
            Transport::Unix(_) => Ok(()),
        }
    }

    pub fn shutdown(&self) -> io::Result<()> {
        match self {
            Transport::Tcp(s) => s.shutdown(Shutdown::Both),
            Transport::Unix(s) => s.shutdown(Shutdown::Both),
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (host, port) = self.peer_label();
        match self {
            Transport::Tcp(_) => write!(f, "Transport::Tcp({}:{})", host, port),
            Transport::Unix(_) => write!(f, "Transport::Unix({})", host),
        }
    }
}

impl From<TcpStream> for Transport {
    fn from(s: TcpStream) -> Self {
        Transport::Tcp(s)
    }
}

impl From<UnixStream> for Transport {
    fn from(s: UnixStream) -> Self {
        Transport::Unix(s)
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(s) => s.read(buf),
            Transport::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(s) => s.write(buf),
            Transport::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Tcp(s) => s.flush(),
            Transport::Unix(s) => s.flush(),
        }
    }
}

impl Source for Transport {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            Transport::Tcp(s) => s.register(registry, token, interests),
            Transport::Unix(s) => s.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            Transport::Tcp(s) => s.reregister(registry, token, interests),
            Transport::Unix(s) => s.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Transport::Tcp(s) => s.deregister(registry),
            Transport::Unix(s) => s.deregister(registry),
        }
    }
}
