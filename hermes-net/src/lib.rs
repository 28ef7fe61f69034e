//! Embeddable TCP/UDP messaging endpoints with protobuf one-shot helpers.
//!
//! `hermes-net` turns an application into a TCP or UDP endpoint (client or
//! server), exchanges raw byte payloads over a single active conversation,
//! and layers typed Protocol Buffers exchanges on top of the same
//! fixed-buffer framing. All I/O execution is delegated to
//! [`hermes_io::IoEngine`]; nothing here spins its own event loop.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Application                       │
//! │   ┌────────────┐   ┌──────────────┐   ┌────────────────┐    │
//! │   │ Endpoint   │   │ protobuf::   │   │ connect /      │    │
//! │   │ (4 kinds)  │   │ send/receive │   │ disconnect     │    │
//! │   └─────┬──────┘   └──────┬───────┘   │ hooks          │    │
//! └─────────┼─────────────────┼───────────┴────────────────┴────┘
//!           │ delegates       │ one-shot
//!           ▼                 ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Stream (TCP) / Datagram (UDP)                  │
//! │        Session (state, options, heartbeat, timers)          │
//! │   fixed 2048-byte framing · strand-serialized operations    │
//! └────────────┬────────────────────────────────────────────────┘
//!              │ post / post_serialized / register
//!              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   hermes-io IoEngine                        │
//! │   ┌──────────┐      ┌────────┐      ┌──────────────┐        │
//! │   │ Reactor  │────▶│ Strand │────▶│ Thread Pool  │        │
//! │   │ (Poll)   │      └────────┘      └──────────────┘        │
//! └────────────┬────────────────────────────────────────────────┘
//!              │ OS events
//!              ▼
//!        epoll / kqueue
//! ```
//!
//! Every stream operation goes through the engine's strand, so one
//! conversation sees a total order on its sends, receives and its final
//! close, no matter how many threads call in. Wire framing is one
//! fixed-size unit per logical operation: a send writes 1..=2048 bytes,
//! a receive returns at most 2048 bytes from one read, and there is no
//! length prefix or delimiter.

pub mod datagram;
pub mod endpoint;
pub mod errors;
pub mod logger;
pub mod protobuf;
pub mod session;
mod sock;
pub mod stream;

/// Size of the fixed per-operation buffer. Payloads above this bound are
/// rejected by the sender; an uncooperative peer's oversize message is
/// truncated at this many bytes per receive.
pub const BUFFER_SIZE: usize = 2048;

pub use datagram::Datagram;
pub use endpoint::{Endpoint, EndpointConfig, EndpointKind, THREAD_POOL};
pub use errors::{NetworkError, Result};
pub use logger::{LogLevel, Logger, SilentLogger, StderrLogger};
pub use session::{Session, SessionOption, SocketState};
pub use stream::Stream;
