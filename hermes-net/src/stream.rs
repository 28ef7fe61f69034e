use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use hermes_io::IoEngine;
use mio::net::TcpStream;

use crate::errors::{NetworkError, Result};
use crate::logger::{LogLevel, Logger, StderrLogger};
use crate::session::{Session, SocketState};
use crate::sock;
use crate::BUFFER_SIZE;

pub type ReadHandler = Box<dyn Fn(Vec<u8>, &Stream) + Send + Sync>;
pub type WriteHandler = Box<dyn Fn(usize, &Stream) + Send + Sync>;
pub type ConnectCallback = Box<dyn FnOnce(&Stream) + Send>;

/// Upper bound on one readiness wait inside a blocking operation; the
/// connected flag is re-checked between slices so teardown is prompt.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// One TCP conversation, reusable for many sends and receives.
///
/// The stream is shared (`Arc`) between its issuer and any pending
/// asynchronous work, so a suspended completion keeps it alive until it
/// runs. Every socket operation is funneled through the engine's strand:
/// a stream therefore sees a total order on its sends, receives and its
/// final close, no matter how many threads call in.
///
/// The socket never leaves `mio`'s non-blocking model: the blocking
/// surface is a non-blocking attempt retried after a bounded readiness
/// wait, re-checking the connected flag between slices. `disconnect`
/// therefore only has to flip the flag and shut the socket down for an
/// in-flight operation to complete immediately with EOF or an error.
pub struct Stream {
    me: Weak<Stream>,
    engine: Arc<IoEngine>,
    socket: Mutex<Option<TcpStream>>,
    session: Mutex<Session>,
    scratch: Mutex<Box<[u8; BUFFER_SIZE]>>,
    connected: AtomicBool,
    read_handler: Mutex<Option<ReadHandler>>,
    write_handler: Mutex<Option<WriteHandler>>,
    logger: Arc<dyn Logger>,
}

impl Stream {
    /// Creates a fresh, unconnected session on `engine`.
    pub fn new_session(engine: Arc<IoEngine>) -> Arc<Self> {
        Self::with_logger(engine, Arc::new(StderrLogger::new()))
    }

    pub fn with_logger(engine: Arc<IoEngine>, logger: Arc<dyn Logger>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            engine,
            socket: Mutex::new(None),
            session: Mutex::new(Session::new()),
            scratch: Mutex::new(Box::new([0; BUFFER_SIZE])),
            connected: AtomicBool::new(false),
            read_handler: Mutex::new(None),
            write_handler: Mutex::new(None),
            logger,
        })
    }

    /// A live `&self` guarantees the strong count is nonzero, so the
    /// upgrade cannot fail. Pending work items hold the returned strong
    /// reference and keep the stream alive until they run.
    fn shared(&self) -> Arc<Stream> {
        self.me.upgrade().expect("stream upgraded while alive")
    }

    /// Wraps a socket accepted by a listener; the stream starts connected.
    pub fn accepted(engine: Arc<IoEngine>, socket: TcpStream) -> Arc<Self> {
        let stream = Self::new_session(engine);
        *stream.socket.lock().unwrap() = Some(socket);
        stream.connected.store(true, Ordering::SeqCst);
        stream
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn engine(&self) -> &Arc<IoEngine> {
        &self.engine
    }

    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap()
    }

    pub fn set_read_handler<F>(&self, handler: F)
    where
        F: Fn(Vec<u8>, &Stream) + Send + Sync + 'static,
    {
        *self.read_handler.lock().unwrap() = Some(Box::new(handler));
    }

    pub fn set_write_handler<F>(&self, handler: F)
    where
        F: Fn(usize, &Stream) + Send + Sync + 'static,
    {
        *self.write_handler.lock().unwrap() = Some(Box::new(handler));
    }

    /// Blocking connect. On failure the stream stays fresh.
    pub fn connect(&self, endpoint: SocketAddr) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(NetworkError::LogicViolation(
                "stream is already connected".into(),
            ));
        }
        let socket = sock::connect_blocking(endpoint).map_err(|e| {
            NetworkError::Connection(format!(
                "[Messenger] Connection to {} failed: {}",
                endpoint, e
            ))
        })?;
        *self.socket.lock().unwrap() = Some(socket);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Submits an asynchronous connect and blocks only until its completion
    /// has been observed once, so follow-up operations cannot race the
    /// handler. `on_connected` runs on the engine's pool before this
    /// returns.
    pub fn async_connect(
        &self,
        endpoint: SocketAddr,
        on_connected: Option<ConnectCallback>,
    ) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();
        let this = self.shared();
        self.engine.post(move || {
            let outcome = match sock::connect_blocking(endpoint) {
                Ok(socket) => {
                    *this.socket.lock().unwrap() = Some(socket);
                    this.connected.store(true, Ordering::SeqCst);
                    if let Some(callback) = on_connected {
                        callback(&this);
                    }
                    Ok(())
                }
                Err(e) => Err(NetworkError::Connection(format!(
                    "[Messenger] Connection to {} failed: {}",
                    endpoint, e
                ))),
            };
            let _ = tx.send(outcome);
        });

        // the engine discards work after stop; surface that instead of hanging
        rx.recv()
            .unwrap_or(Err(NetworkError::Engine(hermes_io::EngineError::Stopped)))
    }

    /// Idempotent teardown, safe under concurrent invocation.
    ///
    /// The winner of the `connected` swap shuts the socket down both ways
    /// right away, cancelling any in-flight blocking operation, then runs
    /// the close through the strand and waits for it; losers observe
    /// `connected == false` and return immediately.
    pub fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(socket) = self.socket.lock().unwrap().as_ref() {
            let _ = socket.shutdown(Shutdown::Both);
        }

        let this = self.shared();
        self.engine.run_serialized(move || this.close_on_strand())?;
        Ok(())
    }

    /// Closes the socket; must run under the strand. `Option::take` makes
    /// the close happen exactly once however many teardowns race.
    fn close_on_strand(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(socket) = self.socket.lock().unwrap().take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        self.session.lock().unwrap().stop();
    }

    /// Synchronous send of one payload, serialized through the strand.
    /// Returns the number of bytes written.
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
            .run_serialized(move || this.write_buffered(&payload))?
    }

    /// Synchronous receive of at most one buffer, serialized through the
    /// strand. Returns the bytes read.
    pub fn receive(&self) -> Result<Vec<u8>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(NetworkError::NotConnected);
        }

        let this = self.shared();
        self.engine.run_serialized(move || this.read_buffered())?
    }

    /// Posts an asynchronous send. The write handler is invoked with the
    /// byte count inside the strand; on failure the error is logged and
    /// the stream disconnected.
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
            match this.write_buffered(&payload) {
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

    /// Posts an asynchronous receive. The read handler is invoked with the
    /// bytes read inside the strand; the scratch buffer is zeroed after it
    /// returns. Failures are logged and disconnect the stream.
    pub fn async_receive(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(NetworkError::NotConnected);
        }

        let this = self.shared();
        self.engine.post_serialized(move || {
            match this.read_buffered() {
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

    /// Synchronous write of the whole payload through the fixed buffer,
    /// retrying after bounded readiness waits. The socket lock is
    /// released between slices so teardown can reach the socket.
    fn write_buffered(&self, payload: &[u8]) -> Result<usize> {
        self.session
            .lock()
            .unwrap()
            .set_socket_state(SocketState::Writing);
        let result = self.write_all_buffered(payload);
        self.session
            .lock()
            .unwrap()
            .set_socket_state(SocketState::Unused);
        result
    }

    fn write_all_buffered(&self, payload: &[u8]) -> Result<usize> {
        let mut written = 0;
        while written < payload.len() {
            let mut guard = self.socket.lock().unwrap();
            let socket = match guard.as_mut() {
                Some(socket) => socket,
                None => return Err(NetworkError::NotConnected),
            };
            let attempt = {
                let mut scratch = self.scratch.lock().unwrap();
                let pending = &payload[written..];
                scratch[..pending.len()].copy_from_slice(pending);
                socket.write(&scratch[..pending.len()])
            };
            match attempt {
                Ok(0) => {
                    return Err(NetworkError::ShortWrite {
                        expected: payload.len(),
                        written,
                    })
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if !self.connected.load(Ordering::SeqCst) {
                        return Err(NetworkError::Write(
                            "[Messenger] connection torn down mid-send".into(),
                        ));
                    }
                    let _ = sock::wait_writable(socket, Some(WAIT_SLICE));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(NetworkError::Write(format!(
                        "[Messenger] Sending message through socket failed: {}",
                        e
                    )))
                }
            }
        }
        Ok(written)
    }

    /// Synchronous read of at most one buffer, retrying after bounded
    /// readiness waits with the same teardown window as the write path.
    fn read_buffered(&self) -> Result<Vec<u8>> {
        self.session
            .lock()
            .unwrap()
            .set_socket_state(SocketState::Reading);

        let result = 'read: loop {
            let mut guard = self.socket.lock().unwrap();
            let socket = match guard.as_mut() {
                Some(socket) => socket,
                None => break 'read Err(NetworkError::NotConnected),
            };
            let mut scratch = self.scratch.lock().unwrap();
            match socket.read(&mut scratch[..]) {
                Ok(0) => break 'read Err(NetworkError::ClosedConnection),
                Ok(n) => {
                    let data = scratch[..n].to_vec();
                    scratch.fill(0);
                    break 'read Ok(data);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    drop(scratch);
                    if !self.connected.load(Ordering::SeqCst) {
                        break 'read Err(NetworkError::ClosedConnection);
                    }
                    let _ = sock::wait_readable(socket, Some(WAIT_SLICE));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    break 'read Err(NetworkError::Read(format!(
                        "[Messenger] Receiving data failed: {}",
                        e
                    )))
                }
            }
        };

        self.session
            .lock()
            .unwrap()
            .set_socket_state(SocketState::Unused);
        result
    }
}
