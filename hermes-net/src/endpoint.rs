use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use hermes_io::{EventHandler, IoEngine, IoEvent, ThreadPool};
use mio::{Interest, Token};

use crate::datagram::Datagram;
use crate::errors::{NetworkError, Result};
use crate::logger::{LogLevel, Logger, StderrLogger};
use crate::sock;
use crate::stream::Stream;

/// Worker threads spawned by an asynchronous TCP server to drive the
/// reactor.
pub const THREAD_POOL: usize = 100;

const ROLE_SERVER: u8 = 0b001;
const PROTO_UDP: u8 = 0b010;

/// The four role/protocol shapes an endpoint can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    TcpClient,
    UdpClient,
    TcpServer,
    UdpServer,
}

impl EndpointKind {
    /// Resolves the user-facing role and protocol strings through a small
    /// bit-field. Pure configuration: no I/O happens here, unresolvable
    /// combinations fail before any socket exists.
    pub fn resolve(role: &str, protocol: &str) -> Result<Self> {
        let mut bits = 0u8;
        match role.to_lowercase().as_str() {
            "client" => {}
            "server" => bits |= ROLE_SERVER,
            other => {
                return Err(NetworkError::Configuration(format!(
                    "[Messenger] Error: unknown role '{}'.",
                    other
                )))
            }
        }
        match protocol.to_lowercase().as_str() {
            "tcp" => {}
            "udp" => bits |= PROTO_UDP,
            other => {
                return Err(NetworkError::Configuration(format!(
                    "[Messenger] Error: unknown protocol '{}'.",
                    other
                )))
            }
        }
        Ok(match bits {
            0 => EndpointKind::TcpClient,
            PROTO_UDP => EndpointKind::UdpClient,
            ROLE_SERVER => EndpointKind::TcpServer,
            _ => EndpointKind::UdpServer,
        })
    }

    pub fn is_server(&self) -> bool {
        matches!(self, EndpointKind::TcpServer | EndpointKind::UdpServer)
    }

    pub fn is_udp(&self) -> bool {
        matches!(self, EndpointKind::UdpClient | EndpointKind::UdpServer)
    }
}

/// Configuration for an endpoint.
///
/// Use [`EndpointConfig::builder`] for ergonomic construction; defaults
/// are a synchronous TCP client on 127.0.0.1 with the stderr sink.
#[derive(Clone)]
pub struct EndpointConfig {
    pub role: String,
    pub protocol: String,
    pub async_mode: bool,
    pub port: String,
    pub host: String,
    pub logger: Arc<dyn Logger>,
}

impl EndpointConfig {
    pub fn builder() -> EndpointConfigBuilder {
        EndpointConfigBuilder::new()
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            role: "client".into(),
            protocol: "tcp".into(),
            async_mode: false,
            port: "8080".into(),
            host: "127.0.0.1".into(),
            logger: Arc::new(StderrLogger::new()),
        }
    }
}

pub struct EndpointConfigBuilder {
    role: Option<String>,
    protocol: Option<String>,
    async_mode: Option<bool>,
    port: Option<String>,
    host: Option<String>,
    logger: Option<Arc<dyn Logger>>,
}

impl EndpointConfigBuilder {
    pub fn new() -> Self {
        Self {
            role: None,
            protocol: None,
            async_mode: None,
            port: None,
            host: None,
            logger: None,
        }
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn async_mode(mut self, enabled: bool) -> Self {
        self.async_mode = Some(enabled);
        self
    }

    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> EndpointConfig {
        let default = EndpointConfig::default();
        EndpointConfig {
            role: self.role.unwrap_or(default.role),
            protocol: self.protocol.unwrap_or(default.protocol),
            async_mode: self.async_mode.unwrap_or(default.async_mode),
            port: self.port.unwrap_or(default.port),
            host: self.host.unwrap_or(default.host),
            logger: self.logger.unwrap_or(default.logger),
        }
    }
}

impl Default for EndpointConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub type Hook = Box<dyn Fn() + Send + Sync>;

/// The endpoint's active conversation. Shared with the accept loop on an
/// asynchronous server, which replaces the held stream on every accept.
type StreamSlot = Arc<Mutex<Option<Arc<Stream>>>>;

struct Acceptor {
    listener: Arc<Mutex<Option<mio::net::TcpListener>>>,
    token: Token,
}

/// The user-facing role-and-protocol handle: a TCP or UDP client or
/// server owning at most one active conversation plus, for a TCP server,
/// an accept loop.
///
/// Built from the four user-facing parameters, activated with
/// [`Endpoint::run`], torn down with [`Endpoint::disconnect`] (also on
/// drop). Send/receive and their async variants delegate to the owned
/// [`Stream`] or [`Datagram`].
pub struct Endpoint {
    kind: EndpointKind,
    async_mode: bool,
    host: String,
    port: u16,
    engine: Arc<IoEngine>,
    connected: AtomicBool,
    stream: StreamSlot,
    datagram: Mutex<Option<Arc<Datagram>>>,
    acceptor: Mutex<Option<Acceptor>>,
    workers: Mutex<Option<ThreadPool>>,
    connect_hook: Arc<Mutex<Option<Hook>>>,
    disconnect_hook: Mutex<Option<Hook>>,
    logger: Arc<dyn Logger>,
}

impl Endpoint {
    /// Builds an endpoint from the user-facing string parameters. Pure
    /// configuration: the combination is validated and the port parsed,
    /// but no socket is opened until [`Endpoint::run`].
    pub fn new(role: &str, protocol: &str, async_mode: bool, port: &str) -> Result<Self> {
        Self::from_config(
            EndpointConfig::builder()
                .role(role)
                .protocol(protocol)
                .async_mode(async_mode)
                .port(port)
                .build(),
        )
    }

    /// Same as [`Endpoint::new`] with an explicit host instead of the
    /// 127.0.0.1 default.
    pub fn with_host(
        role: &str,
        protocol: &str,
        async_mode: bool,
        port: &str,
        host: &str,
    ) -> Result<Self> {
        Self::from_config(
            EndpointConfig::builder()
                .role(role)
                .protocol(protocol)
                .async_mode(async_mode)
                .port(port)
                .host(host)
                .build(),
        )
    }

    pub fn from_config(config: EndpointConfig) -> Result<Self> {
        let kind = EndpointKind::resolve(&config.role, &config.protocol)?;
        let port = sock::parse_port(&config.port)?;
        let engine = IoEngine::new()?;

        Ok(Self {
            kind,
            async_mode: config.async_mode,
            host: config.host,
            port,
            engine,
            connected: AtomicBool::new(false),
            stream: StreamSlot::default(),
            datagram: Mutex::new(None),
            acceptor: Mutex::new(None),
            workers: Mutex::new(None),
            connect_hook: Arc::new(Mutex::new(None)),
            disconnect_hook: Mutex::new(None),
            logger: config.logger,
        })
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn is_async(&self) -> bool {
        self.async_mode
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connect_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.connect_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn set_disconnect_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.disconnect_hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Activates the endpoint: connects a client, accepts (or starts
    /// accepting) on a server.
    pub fn run(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(NetworkError::LogicViolation(format!(
                "already connected to {}:{}",
                self.host, self.port
            )));
        }

        match self.kind {
            EndpointKind::TcpClient => self.run_tcp_client(),
            EndpointKind::TcpServer => self.run_tcp_server(),
            EndpointKind::UdpClient => self.run_udp_client(),
            EndpointKind::UdpServer => self.run_udp_server(),
        }
    }

    fn run_tcp_client(&self) -> Result<()> {
        let addr = sock::resolve(&self.host, self.port)?;
        let stream = Stream::with_logger(Arc::clone(&self.engine), Arc::clone(&self.logger));

        if self.async_mode {
            self.engine.run()?;
            let hook = Arc::clone(&self.connect_hook);
            stream.async_connect(
                addr,
                Some(Box::new(move |_stream: &Stream| {
                    if let Some(hook) = hook.lock().unwrap().as_ref() {
                        hook();
                    }
                })),
            )?;
        } else {
            stream.connect(addr)?;
            if let Some(hook) = self.connect_hook.lock().unwrap().as_ref() {
                hook();
            }
        }

        *self.stream.lock().unwrap() = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn run_tcp_server(&self) -> Result<()> {
        let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], self.port));

        if !self.async_mode {
            // one blocking accept on the caller's thread
            let mut listener = sock::bind_listener(addr)?;
            let (socket, _peer) = sock::accept_blocking(&mut listener)?;
            let stream = Stream::accepted(Arc::clone(&self.engine), socket);
            *self.stream.lock().unwrap() = Some(stream);
            self.connected.store(true, Ordering::SeqCst);
            if let Some(hook) = self.connect_hook.lock().unwrap().as_ref() {
                hook();
            }
            return Ok(());
        }

        // scale the reactor out before the acceptor is registered
        let pool = ThreadPool::new(THREAD_POOL)?;
        for _ in 0..THREAD_POOL {
            let engine = Arc::clone(&self.engine);
            pool.exec(move || engine.run_loop())?;
        }
        *self.workers.lock().unwrap() = Some(pool);

        let listener = sock::bind_listener(addr)?;
        let token = self.engine.poll_handle().next_token();
        let listener_slot: Arc<Mutex<Option<mio::net::TcpListener>>> = Arc::new(Mutex::new(None));

        let handler = AcceptHandler {
            listener: Arc::clone(&listener_slot),
            token,
            engine: Arc::clone(&self.engine),
            stream_slot: Arc::clone(&self.stream),
            connect_hook: Arc::clone(&self.connect_hook),
            logger: Arc::clone(&self.logger),
        };

        // the listener goes into the shared slot before registration so
        // the very first readiness event already finds it there
        {
            let mut slot = listener_slot.lock().unwrap();
            *slot = Some(listener);
            self.engine
                .register(slot.as_mut().unwrap(), token, Interest::READABLE, handler)?;
        }

        *self.acceptor.lock().unwrap() = Some(Acceptor {
            listener: listener_slot,
            token,
        });
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn run_udp_client(&self) -> Result<()> {
        let addr = sock::resolve(&self.host, self.port)?;
        let datagram = Datagram::with_logger(Arc::clone(&self.engine), Arc::clone(&self.logger));
        datagram.connect(addr)?;
        *self.datagram.lock().unwrap() = Some(datagram);
        self.connected.store(true, Ordering::SeqCst);
        if self.async_mode {
            self.engine.run()?;
        }
        if let Some(hook) = self.connect_hook.lock().unwrap().as_ref() {
            hook();
        }
        Ok(())
    }

    fn run_udp_server(&self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let datagram = Datagram::with_logger(Arc::clone(&self.engine), Arc::clone(&self.logger));
        datagram.bind(addr)?;
        *self.datagram.lock().unwrap() = Some(datagram);
        self.connected.store(true, Ordering::SeqCst);
        if self.async_mode {
            self.engine.run()?;
        }
        if let Some(hook) = self.connect_hook.lock().unwrap().as_ref() {
            hook();
        }
        Ok(())
    }

    /// Releases every owned resource: acceptor, conversation, workers.
    /// Fires the disconnection hook once. Idempotent.
    pub fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(acceptor) = self.acceptor.lock().unwrap().take() {
            if let Some(mut listener) = acceptor.listener.lock().unwrap().take() {
                let _ = self.engine.deregister(&mut listener, acceptor.token);
            }
        }

        if let Some(stream) = self.stream.lock().unwrap().take() {
            let _ = stream.disconnect();
        }
        if let Some(datagram) = self.datagram.lock().unwrap().take() {
            let _ = datagram.disconnect();
        }

        self.engine.stop();
        // joins every reactor worker except a caller that is one itself
        self.workers.lock().unwrap().take();

        if let Some(hook) = self.disconnect_hook.lock().unwrap().as_ref() {
            hook();
        }
        Ok(())
    }

    fn current_stream(&self) -> Result<Arc<Stream>> {
        self.stream
            .lock()
            .unwrap()
            .as_ref()
            .map(Arc::clone)
            .ok_or(NetworkError::NotConnected)
    }

    fn current_datagram(&self) -> Result<Arc<Datagram>> {
        self.datagram
            .lock()
            .unwrap()
            .as_ref()
            .map(Arc::clone)
            .ok_or(NetworkError::NotConnected)
    }

    fn require_connected(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(NetworkError::NotConnected);
        }
        Ok(())
    }

    fn require_async(&self, operation: &str) -> Result<()> {
        if !self.async_mode {
            return Err(NetworkError::LogicViolation(format!(
                "synchronous endpoint cannot perform asynchronous operation '{}'",
                operation
            )));
        }
        Ok(())
    }

    /// Sends one payload over the active conversation.
    pub fn send(&self, payload: &[u8]) -> Result<usize> {
        self.require_connected()?;
        if self.kind.is_udp() {
            self.current_datagram()?.send(payload)
        } else {
            self.current_stream()?.send(payload)
        }
    }

    /// Receives at most one buffer from the active conversation.
    pub fn receive(&self) -> Result<Vec<u8>> {
        self.require_connected()?;
        if self.kind.is_udp() {
            self.current_datagram()?.receive()
        } else {
            self.current_stream()?.receive()
        }
    }

    /// Posts an asynchronous send; `on_sent` observes the byte count.
    pub fn async_send<F>(&self, payload: &[u8], on_sent: F) -> Result<()>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.require_async("async_send")?;
        self.require_connected()?;
        if self.kind.is_udp() {
            let datagram = self.current_datagram()?;
            datagram.set_write_handler(move |bytes, _| on_sent(bytes));
            datagram.async_send(payload)
        } else {
            let stream = self.current_stream()?;
            stream.set_write_handler(move |bytes, _| on_sent(bytes));
            stream.async_send(payload)
        }
    }

    /// Posts an asynchronous receive; `on_received` observes the bytes.
    pub fn async_receive<F>(&self, on_received: F) -> Result<()>
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        self.require_async("async_receive")?;
        self.require_connected()?;
        if self.kind.is_udp() {
            let datagram = self.current_datagram()?;
            datagram.set_read_handler(move |data, _| on_received(data));
            datagram.async_receive()
        } else {
            let stream = self.current_stream()?;
            stream.set_read_handler(move |data, _| on_received(data));
            stream.async_receive()
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if self.connected.load(Ordering::SeqCst) {
            let _ = self.disconnect();
        }
    }
}

/// Accept loop of an asynchronous TCP server.
///
/// Registered for readiness on the listener: each wake-up accepts until
/// `WouldBlock`, and every accepted socket replaces the previously held
/// stream before the connect hook fires. The single readiness
/// registration is what keeps exactly one accept outstanding. A real
/// accept error tears the acceptor down and is reported as fatal.
struct AcceptHandler {
    listener: Arc<Mutex<Option<mio::net::TcpListener>>>,
    token: Token,
    engine: Arc<IoEngine>,
    stream_slot: StreamSlot,
    connect_hook: Arc<Mutex<Option<Hook>>>,
    logger: Arc<dyn Logger>,
}

impl EventHandler for AcceptHandler {
    fn handle_event(&self, event: &IoEvent) {
        if !event.is_readable() {
            return;
        }

        loop {
            let accepted = {
                let guard = self.listener.lock().unwrap();
                match guard.as_ref() {
                    Some(listener) => listener.accept(),
                    // the endpoint disconnected under us
                    None => return,
                }
            };

            match accepted {
                Ok((socket, _peer)) => {
                    let stream = Stream::accepted(Arc::clone(&self.engine), socket);
                    let previous = self.stream_slot.lock().unwrap().replace(stream);
                    if let Some(previous) = previous {
                        let _ = previous.disconnect();
                    }
                    if let Some(hook) = self.connect_hook.lock().unwrap().as_ref() {
                        hook();
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    let fatal = NetworkError::Fatal(format!("[Messenger] Accept failed: {}", e));
                    self.logger.log(LogLevel::Error, &fatal.to_string());
                    if let Some(mut listener) = self.listener.lock().unwrap().take() {
                        let _ = self.engine.deregister(&mut listener, self.token);
                    }
                    break;
                }
            }
        }
    }
}
