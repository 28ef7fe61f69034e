use hermes_io::EngineError;
use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, NetworkError>;

/// Error kinds surfaced by the messaging layer.
///
/// Synchronous operations return these directly; asynchronous operations
/// deliver failures through the registered completion handler when one
/// exists, and otherwise log to the endpoint's sink and disconnect.
#[derive(Debug)]
pub enum NetworkError {
    /// Invalid role/protocol combination, unknown session option, bad port.
    Configuration(String),
    /// Connect or accept failure, address in use.
    Connection(String),
    /// Empty or oversize payload, rejected before the socket is touched.
    MessageSize(usize),
    /// OS-level send failure.
    Write(String),
    /// Fewer bytes left the socket than the payload holds.
    ShortWrite { expected: usize, written: usize },
    /// OS-level receive failure.
    Read(String),
    /// A receive completed without transferring any bytes.
    ZeroBytesRead,
    /// The peer closed the connection (EOF on receive).
    ClosedConnection,
    /// The operation requires a connected stream.
    NotConnected,
    /// Asynchronous operation issued against a synchronous endpoint, or a
    /// comparable misuse of the API.
    LogicViolation(String),
    /// Error inside an async completion that cannot reach a caller.
    Fatal(String),
    /// Failure bubbled up from the execution engine.
    Engine(EngineError),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::Configuration(msg) => write!(f, "Configuration Error: {}", msg),
            NetworkError::Connection(msg) => write!(f, "Connect operation: {}", msg),
            NetworkError::MessageSize(size) => write!(
                f,
                "Write operation: invalid message size {} (expected 1..={})",
                size,
                crate::BUFFER_SIZE
            ),
            NetworkError::Write(msg) => write!(f, "Write operation: {}", msg),
            NetworkError::ShortWrite { expected, written } => write!(
                f,
                "Write operation: short write, {} of {} bytes sent",
                written, expected
            ),
            NetworkError::Read(msg) => write!(f, "Read operation: {}", msg),
            NetworkError::ZeroBytesRead => {
                write!(f, "Read operation: 0 bytes received")
            }
            NetworkError::ClosedConnection => {
                write!(f, "Read operation: connection closed by peer")
            }
            NetworkError::NotConnected => {
                write!(f, "Logic error: not connected, call 'run' once before")
            }
            NetworkError::LogicViolation(msg) => write!(f, "Logic error: {}", msg),
            NetworkError::Fatal(msg) => write!(f, "Fatal: {}", msg),
            NetworkError::Engine(e) => write!(f, "Engine: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NetworkError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for NetworkError {
    fn from(err: io::Error) -> Self {
        NetworkError::Connection(err.to_string())
    }
}

impl From<EngineError> for NetworkError {
    fn from(err: EngineError) -> Self {
        NetworkError::Engine(err)
    }
}
