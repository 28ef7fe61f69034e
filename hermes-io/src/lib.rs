//! Reactor-backed I/O execution engine.
//!
//! `hermes-io` provides the execution environment the messaging layer
//! builds on: an OS reactor wrapper ([`poll::PollHandle`]), a worker
//! thread pool ([`thread_pool::ThreadPool`]), a serializing dispatch lane
//! ([`strand::Strand`]) and the [`IoEngine`] facade tying them together.
//!
//! The model is callback-driven rather than async/await: ready events and
//! posted work execute on pool workers, and anything that must not overlap
//! goes through the strand, which guarantees submission order and
//! one-at-a-time execution across however many workers are draining.

#![cfg_attr(feature = "unstable-mpmc", feature(mpmc_channel))]

pub mod engine;
pub mod error;
pub mod handler;
pub mod poll;
pub mod strand;
pub mod thread_pool;

pub use engine::{IoEngine, DEFAULT_EVENTS_CAPACITY, DEFAULT_POLL_TIMEOUT_MS};
pub use error::{EngineError, Result};
pub use handler::{EventHandler, IoEvent};
pub use poll::{PollHandle, WAKER_TOKEN};
pub use strand::Strand;
pub use thread_pool::{ThreadPool, DEFAULT_POOL_CAPACITY};
