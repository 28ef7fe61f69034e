use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use hermes_io::IoEngine;

use crate::errors::{NetworkError, Result};
use crate::logger::{LogLevel, Logger, StderrLogger};
use crate::session::{Session, SocketState};
use crate::BUFFER_SIZE;

pub type DatagramReadHandler = Box<dyn Fn(Vec<u8>, &Datagram) + Send + Sync>;
pub type DatagramWriteHandler = Box<dyn Fn(usize, &Datagram) + Send + Sync>;

/// One UDP conversation: the stream contract applied per datagram.
///
/// A bound socket (server side) learns its peer from the first datagram it
/// receives and replies there; a connected socket (client side) has its
/// peer fixed up front. The same size policy, strand serialization and
/// handler plumbing as [`crate::stream::Stream`] apply, with datagram
/// semantics: one send is one datagram, one receive returns one datagram,
/// and there is no end-of-file from the peer.
pub struct Datagram {
    me: Weak<Datagram>,
    engine: Arc<IoEngine>,
    socket: Mutex<Option<UdpSocket>>,
    peer: Mutex<Option<SocketAddr>>,
    session: Mutex<Session>,
    scratch: Mutex<Box<[u8; BUFFER_SIZE]>>,
    connected: AtomicBool,
    read_handler: Mutex<Option<DatagramReadHandler>>,
    write_handler: Mutex<Option<DatagramWriteHandler>>,
    logger: Arc<dyn Logger>,
}

impl Datagram {
    pub fn new_session(engine: Arc<IoEngine>) -> Arc<Self> {
        Self::with_logger(engine, Arc::new(StderrLogger::new()))
    }

    pub fn with_logger(engine: Arc<IoEngine>, logger: Arc<dyn Logger>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            engine,
            socket: Mutex::new(None),
            peer: Mutex::new(None),
            session: Mutex::new(Session::new()),
            scratch: Mutex::new(Box::new([0; BUFFER_SIZE])),
            connected: AtomicBool::new(false),
            read_handler: Mutex::new(None),
            write_handler: Mutex::new(None),
            logger,
        })
    }

    /// A live `&self` guarantees the strong count is nonzero, so the
    /// upgrade cannot fail.
    fn shared(&self) -> Arc<Datagram> {
        self.me.upgrade().expect("datagram upgraded while alive")
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap()
    }

    /// Binds the socket locally (server side); the peer is learned from
    /// the first received datagram.
    pub fn bind(&self, addr: SocketAddr) -> Result<()> {
        let socket = UdpSocket::bind(addr).map_err(|e| {
            NetworkError::Connection(format!("[Messenger] Error: bind on {} failed: {}", addr, e))
        })?;
        *self.socket.lock().unwrap() = Some(socket);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Binds an ephemeral local port and fixes the peer (client side).
    pub fn connect(&self, endpoint: SocketAddr) -> Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| {
            NetworkError::Connection(format!("[Messenger] Error: bind failed: {}", e))
        })?;
        socket.connect(endpoint).map_err(|e| {
            NetworkError::Connection(format!(
                "[Messenger] Connection to {} failed: {}",
                endpoint, e
            ))
        })?;
        *self.socket.lock().unwrap() = Some(socket);
        *self.peer.lock().unwrap() = Some(endpoint);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Idempotent teardown mirroring the stream's: winner closes through
    /// the strand, losers observe the flag.
    pub fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let this = self.shared();
        self.engine.run_serialized(move || this.close_on_strand())?;
        Ok(())
    }

    fn close_on_strand(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.socket.lock().unwrap().take();
        self.peer.lock().unwrap().take();
        self.session.lock().unwrap().stop();
    }

    /// Sends one datagram to the peer. Serialized through the strand.
    pub fn send(&self, payload: &[u8]) -> Result<usize> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(NetworkError::NotConnected);
        }
        if payload.is_empty() || payload.len() > BUFFER_SIZE {
            return Err(NetworkError::MessageSize(payload.len()));
        }

        let this = self.shared();
        let payload = payload.to_vec();
        self.engine
            .run_serialized(move || this.send_datagram(&payload))?
    }

    /// Receives one datagram. Serialized through the strand.
    pub fn receive(&self) -> Result<Vec<u8>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(NetworkError::NotConnected);
        }

        let this = self.shared();
        self.engine.run_serialized(move || this.recv_datagram())?
    }

    pub fn set_read_handler<F>(&self, handler: F)
    where
        F: Fn(Vec<u8>, &Datagram) + Send + Sync + 'static,
    {
        *self.read_handler.lock().unwrap() = Some(Box::new(handler));
    }

    pub fn set_write_handler<F>(&self, handler: F)
    where
        F: Fn(usize, &Datagram) + Send + Sync + 'static,
    {
        *self.write_handler.lock().unwrap() = Some(Box::new(handler));
    }

    /// Posts an asynchronous send; completion reaches the write handler.
    pub fn async_send(&self, payload: &[u8]) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(NetworkError::NotConnected);
        }
        if payload.is_empty() || payload.len() > BUFFER_SIZE {
            return Err(NetworkError::MessageSize(payload.len()));
        }

        let this = self.shared();
        let payload = payload.to_vec();
        self.engine.post_serialized(move || {
            match this.send_datagram(&payload) {
                Ok(bytes) => {
                    if let Some(handler) = this.write_handler.lock().unwrap().as_ref() {
                        handler(bytes, &this);
                    }
                }
                Err(e) => {
                    this.logger
                        .log(LogLevel::Error, &format!("[Messenger] async_send: {}", e));
                    this.close_on_strand();
                }
            };
        });
        Ok(())
    }

    /// Posts an asynchronous receive; the datagram reaches the read
    /// handler.
    pub fn async_receive(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(NetworkError::NotConnected);
        }

        let this = self.shared();
        self.engine.post_serialized(move || {
            match this.recv_datagram() {
                Ok(data) => {
                    if let Some(handler) = this.read_handler.lock().unwrap().as_ref() {
                        handler(data, &this);
                    }
                }
                Err(e) => {
                    this.logger
                        .log(LogLevel::Error, &format!("[Messenger] async_receive: {}", e));
                    this.close_on_strand();
                }
            };
        });
        Ok(())
    }

    fn socket_clone(&self) -> Result<UdpSocket> {
        let guard = self.socket.lock().unwrap();
        let socket = guard.as_ref().ok_or(NetworkError::NotConnected)?;
        socket
            .try_clone()
            .map_err(|e| NetworkError::Connection(format!("[Messenger] socket handle: {}", e)))
    }

    fn send_datagram(&self, payload: &[u8]) -> Result<usize> {
        let socket = self.socket_clone()?;
        let peer = *self.peer.lock().unwrap();
        self.session
            .lock()
            .unwrap()
            .set_socket_state(SocketState::Writing);

        let result = (|| {
            let mut scratch = self.scratch.lock().unwrap();
            scratch[..payload.len()].copy_from_slice(payload);
            let sent = match peer {
                // connected client socket
                Some(_) => socket.send(&scratch[..payload.len()]),
                // server side can only answer a peer it has heard from
                None => return Err(NetworkError::NotConnected),
            };
            match sent {
                Ok(n) if n == payload.len() => Ok(n),
                Ok(n) => Err(NetworkError::ShortWrite {
                    expected: payload.len(),
                    written: n,
                }),
                Err(e) => Err(NetworkError::Write(format!(
                    "[Messenger] Sending datagram failed: {}",
                    e
                ))),
            }
        })();

        self.session
            .lock()
            .unwrap()
            .set_socket_state(SocketState::Unused);
        result
    }

    fn recv_datagram(&self) -> Result<Vec<u8>> {
        let socket = self.socket_clone()?;
        let connected_peer = self.peer.lock().unwrap().is_some();
        self.session
            .lock()
            .unwrap()
            .set_socket_state(SocketState::Reading);

        let result = {
            let mut scratch = self.scratch.lock().unwrap();
            let received = if connected_peer {
                socket.recv(&mut scratch[..])
            } else {
                socket.recv_from(&mut scratch[..]).map(|(n, from)| {
                    // remember the sender so a reply has a destination
                    let mut peer = self.peer.lock().unwrap();
                    if peer.is_none() {
                        *peer = Some(from);
                        drop(peer);
                        if let Some(sock) = self.socket.lock().unwrap().as_ref() {
                            let _ = sock.connect(from);
                        }
                    }
                    n
                })
            };
            let outcome = match received {
                Ok(0) => Err(NetworkError::ZeroBytesRead),
                Ok(n) => Ok(scratch[..n].to_vec()),
                Err(e) => Err(NetworkError::Read(format!(
                    "[Messenger] Receiving datagram failed: {}",
                    e
                ))),
            };
            scratch.fill(0);
            outcome
        };

        self.session
            .lock()
            .unwrap()
            .set_socket_state(SocketState::Unused);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Arc<IoEngine> {
        IoEngine::new().unwrap()
    }

    #[test]
    fn test_datagram_roundtrip() {
        let engine = engine();
        let server = Datagram::new_session(engine.clone());
        server.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let server_addr = {
            let guard = server.socket.lock().unwrap();
            guard.as_ref().unwrap().local_addr().unwrap()
        };

        let client = Datagram::new_session(engine.clone());
        client.connect(server_addr).unwrap();

        assert_eq!(client.send(b"ping").unwrap(), 4);
        assert_eq!(server.receive().unwrap(), b"ping");

        // the server learned its peer from the datagram and can reply
        assert_eq!(server.send(b"pong").unwrap(), 4);
        assert_eq!(client.receive().unwrap(), b"pong");

        client.disconnect().unwrap();
        server.disconnect().unwrap();
        engine.stop();
    }

    #[test]
    fn test_server_send_without_peer_is_rejected() {
        let engine = engine();
        let server = Datagram::new_session(engine.clone());
        server.bind("127.0.0.1:0".parse().unwrap()).unwrap();

        assert!(matches!(
            server.send(b"hello"),
            Err(NetworkError::NotConnected)
        ));
        server.disconnect().unwrap();
        engine.stop();
    }

    #[test]
    fn test_datagram_size_policy() {
        let engine = engine();
        let client = Datagram::new_session(engine.clone());
        client.connect("127.0.0.1:9".parse().unwrap()).unwrap();

        assert!(matches!(
            client.send(b""),
            Err(NetworkError::MessageSize(0))
        ));
        let oversize = vec![0u8; BUFFER_SIZE + 1];
        assert!(matches!(
            client.send(&oversize),
            Err(NetworkError::MessageSize(_))
        ));
        client.disconnect().unwrap();
        engine.stop();
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let engine = engine();
        let client = Datagram::new_session(engine.clone());
        client.connect("127.0.0.1:9".parse().unwrap()).unwrap();
        client.disconnect().unwrap();
        client.disconnect().unwrap();
        assert!(!client.is_connected());
        engine.stop();
    }
}
