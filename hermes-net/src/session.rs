use std::time::{Duration, Instant};

use crate::errors::{NetworkError, Result};

pub const DEFAULT_HEARTBEAT_MESSAGE: &str = "<3";

/// Usage state of the socket a session is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketState {
    #[default]
    Unused,
    Reading,
    Writing,
}

/// The closed set of per-session options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOption {
    State,
    Deadline,
    Heartbeat,
}

impl SessionOption {
    pub const ALL: [SessionOption; 3] = [
        SessionOption::State,
        SessionOption::Deadline,
        SessionOption::Heartbeat,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "state" => Some(SessionOption::State),
            "deadline" => Some(SessionOption::Deadline),
            "heartbeat" => Some(SessionOption::Heartbeat),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            SessionOption::State => 0,
            SessionOption::Deadline => 1,
            SessionOption::Heartbeat => 2,
        }
    }
}

/// A cancellable one-shot timer slot.
///
/// Sessions expose two of these; nothing arms them by default and no
/// scheduled behavior is attached yet, they are bookkeeping for the
/// deadline and heartbeat policies.
#[derive(Debug, Default)]
pub struct Timer {
    fire_at: Option<Instant>,
}

impl Timer {
    pub fn arm_in(&mut self, delay: Duration) {
        self.fire_at = Some(Instant::now() + delay);
    }

    pub fn is_armed(&self) -> bool {
        self.fire_at.is_some()
    }

    pub fn fire_at(&self) -> Option<Instant> {
        self.fire_at
    }

    pub fn cancel(&mut self) {
        self.fire_at = None;
    }
}

/// Non-I/O policy state attached to one socket.
///
/// Tracks the socket usage state, the three boolean options, the heartbeat
/// text and the two timer slots. Performs no I/O itself.
pub struct Session {
    state: SocketState,
    options: [bool; 3],
    heartbeat_message: String,
    deadline: Timer,
    heartbeat: Timer,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SocketState::Unused,
            options: [false; 3],
            heartbeat_message: DEFAULT_HEARTBEAT_MESSAGE.to_string(),
            deadline: Timer::default(),
            heartbeat: Timer::default(),
        }
    }

    pub fn socket_state(&self) -> SocketState {
        self.state
    }

    pub fn set_socket_state(&mut self, state: SocketState) {
        self.state = state;
    }

    pub fn is_socket_unused(&self) -> bool {
        self.state == SocketState::Unused
    }

    pub fn is_ready_for_reading(&self) -> bool {
        self.state == SocketState::Reading
    }

    pub fn is_ready_for_writing(&self) -> bool {
        self.state == SocketState::Writing
    }

    /// Activates a named option. Unknown names are a configuration error.
    pub fn activate_option(&mut self, name: &str) -> Result<()> {
        let option = SessionOption::from_name(name).ok_or_else(|| {
            NetworkError::Configuration(format!("[Session] Error: invalid option '{}'.", name))
        })?;
        self.options[option.index()] = true;
        Ok(())
    }

    /// Returns `false` for unknown names rather than failing.
    pub fn is_option_activated(&self, name: &str) -> bool {
        SessionOption::from_name(name)
            .map(|option| self.options[option.index()])
            .unwrap_or(false)
    }

    pub fn heartbeat_message(&self) -> &str {
        &self.heartbeat_message
    }

    pub fn set_heartbeat_message(&mut self, message: impl Into<String>) {
        self.heartbeat_message = message.into();
    }

    pub fn deadline(&mut self) -> &mut Timer {
        &mut self.deadline
    }

    pub fn heartbeat(&mut self) -> &mut Timer {
        &mut self.heartbeat
    }

    /// Cancels both timers and clears every option. Idempotent.
    pub fn stop(&mut self) {
        self.options = [false; 3];
        self.deadline.cancel();
        self.heartbeat.cancel();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
