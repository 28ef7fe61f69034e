use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the I/O execution engine.
#[derive(Debug)]
pub enum EngineError {
    /// The engine could not be constructed (poll creation, worker spawn).
    Init(String),
    /// An OS-level polling or waking failure.
    Io(io::Error),
    /// A lock guarding engine state was poisoned.
    PoisonedLock(String),
    /// Work was handed to an engine whose workers are gone.
    Stopped,
    /// A blocking submission never received its completion.
    Interrupted(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Init(msg) => write!(f, "Initialization Error: {}", msg),
            EngineError::Io(e) => write!(f, "IO Error: {}", e),
            EngineError::PoisonedLock(msg) => write!(f, "Lock Poisoned: {}", msg),
            EngineError::Stopped => write!(f, "Engine is stopped"),
            EngineError::Interrupted(msg) => write!(f, "Interrupted: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        EngineError::Io(err)
    }
}
