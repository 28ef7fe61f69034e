//! Socket plumbing shared by the stream, endpoint and protobuf layers.
//!
//! Sockets stay in `mio`'s non-blocking model throughout; the blocking
//! surface is built here as readiness waits on a private poller, so a
//! "blocking" accept or connect is a non-blocking attempt retried after
//! the OS reports the socket ready.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::errors::{NetworkError, Result};

/// Parses a user-supplied decimal port string.
pub(crate) fn parse_port(port: &str) -> Result<u16> {
    port.trim().parse::<u16>().map_err(|_| {
        NetworkError::Configuration(format!("[Messenger] Error: invalid port '{}'.", port))
    })
}

/// Resolves `host:port` through the OS resolver, preferring IPv4.
pub(crate) fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut fallback = None;
    let addrs = (host, port).to_socket_addrs().map_err(|e| {
        NetworkError::Connection(format!(
            "[Messenger] Error: could not resolve {}:{}: {}",
            host, port, e
        ))
    })?;
    for addr in addrs {
        if addr.is_ipv4() {
            return Ok(addr);
        }
        fallback.get_or_insert(addr);
    }
    fallback.ok_or_else(|| {
        NetworkError::Connection(format!(
            "[Messenger] Error: no address found for {}:{}",
            host, port
        ))
    })
}

/// Binds a non-blocking listener; `mio` sets `SO_REUSEADDR` while
/// binding, which is what gives server sockets their address reuse.
pub(crate) fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr).map_err(|e| {
        NetworkError::Connection(format!("[Messenger] Error: bind on {} failed: {}", addr, e))
    })
}

/// Parks the calling thread on a private poller until `source` reports
/// the wanted readiness or `timeout` elapses.
pub(crate) fn wait_ready<S>(
    source: &mut S,
    interest: Interest,
    timeout: Option<Duration>,
) -> io::Result<()>
where
    S: mio::event::Source + ?Sized,
{
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(8);
    poll.registry().register(source, Token(0), interest)?;
    let outcome = poll.poll(&mut events, timeout);
    let _ = poll.registry().deregister(source);
    outcome
}

pub(crate) fn wait_readable<S>(source: &mut S, timeout: Option<Duration>) -> io::Result<()>
where
    S: mio::event::Source + ?Sized,
{
    wait_ready(source, Interest::READABLE, timeout)
}

pub(crate) fn wait_writable<S>(source: &mut S, timeout: Option<Duration>) -> io::Result<()>
where
    S: mio::event::Source + ?Sized,
{
    wait_ready(source, Interest::WRITABLE, timeout)
}

/// Accepts one peer, waiting on readiness whenever the listener reports
/// `WouldBlock`.
pub(crate) fn accept_blocking(listener: &mut TcpListener) -> Result<(TcpStream, SocketAddr)> {
    loop {
        match listener.accept() {
            Ok(pair) => return Ok(pair),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                wait_readable(listener, None)
                    .map_err(|e| NetworkError::Connection(e.to_string()))?;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                return Err(NetworkError::Connection(format!(
                    "[Messenger] Accept failed: {}",
                    e
                )))
            }
        }
    }
}

/// Initiates a connect and waits until it has settled: writable plus an
/// empty error slot means established, anything else is the OS verdict.
pub(crate) fn connect_blocking(endpoint: SocketAddr) -> io::Result<TcpStream> {
    let mut socket = TcpStream::connect(endpoint)?;
    loop {
        wait_writable(&mut socket, Some(Duration::from_secs(1)))?;
        if let Some(e) = socket.take_error()? {
            return Err(e);
        }
        match socket.peer_addr() {
            Ok(_) => return Ok(socket),
            // still in progress
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => return Err(e),
        }
    }
}
