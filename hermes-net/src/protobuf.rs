//! One-shot typed exchanges over TCP.
//!
//! Each operation opens a fresh short-lived [`Stream`] on its own engine,
//! performs exactly one exchange of one serialized Protocol Buffers
//! message, and tears everything down deterministically before returning.
//! No state is retained between calls. The serialized form on the wire is
//! exactly `message.encode_to_vec()`: no extra framing, one fixed-size
//! buffer per exchange.

use std::net::SocketAddr;
use std::sync::{mpsc, Arc, Mutex};

use hermes_io::IoEngine;
use prost::Message;

use crate::errors::{NetworkError, Result};
use crate::logger::{LogLevel, Logger, StderrLogger};
use crate::sock;
use crate::stream::Stream;

/// Synchronous send of one serialized message. Returns the serialized
/// length once every byte has left the socket.
pub fn send<M: Message>(host: &str, port: &str, message: &M) -> Result<usize> {
    let port = sock::parse_port(port)?;
    let payload = message.encode_to_vec();
    let logger: Arc<dyn Logger> = Arc::new(StderrLogger::new());
    let engine = IoEngine::new()?;

    let outcome = (|| {
        let addr = sock::resolve(host, port)?;
        let stream = Stream::with_logger(Arc::clone(&engine), Arc::clone(&logger));
        stream.connect(addr)?;
        let bytes = stream.send(&payload)?;
        stream.disconnect()?;
        Ok(bytes)
    })();

    engine.stop();
    report(&logger, outcome)
}

/// Synchronous receive of one serialized message: accepts one peer on
/// `port`, reads one buffer, decodes it.
pub fn receive<M: Message + Default>(port: &str) -> Result<M> {
    let port = sock::parse_port(port)?;
    let logger: Arc<dyn Logger> = Arc::new(StderrLogger::new());
    let engine = IoEngine::new()?;

    let outcome = (|| {
        let mut listener = sock::bind_listener(SocketAddr::from(([0, 0, 0, 0], port)))?;
        let (socket, _peer) = sock::accept_blocking(&mut listener).map_err(|e| {
            NetworkError::Connection(format!("[protobuf] Accept on port {}: {}", port, e))
        })?;
        let stream = Stream::accepted(Arc::clone(&engine), socket);
        let data = stream.receive()?;
        let message = M::decode(&data[..])
            .map_err(|e| NetworkError::Read(format!("[protobuf] parse failed: {}", e)))?;
        stream.disconnect()?;
        Ok(message)
    })();

    engine.stop();
    report(&logger, outcome)
}

/// Asynchronous send: connect and write happen on the engine's workers,
/// `on_sent` observes the byte count, and the worker is joined before the
/// call returns.
pub fn async_send<M, F>(host: &str, port: &str, message: &M, on_sent: Option<F>) -> Result<()>
where
    M: Message,
    F: FnOnce(usize) + Send + 'static,
{
    let port = sock::parse_port(port)?;
    let payload = message.encode_to_vec();
    let logger: Arc<dyn Logger> = Arc::new(StderrLogger::new());
    let engine = IoEngine::new()?;

    let outcome = (|| {
        engine.run()?;
        let addr = sock::resolve(host, port)?;
        let stream = Stream::with_logger(Arc::clone(&engine), Arc::clone(&logger));
        stream.async_connect(addr, None)?;

        let callback = Mutex::new(on_sent);
        stream.set_write_handler(move |bytes, _stream| {
            if let Some(callback) = callback.lock().unwrap().take() {
                callback(bytes);
            }
        });
        stream.async_send(&payload)?;

        // strand barrier: the queued write has completed once this runs
        engine.run_serialized(|| {})?;
        stream.disconnect()?;
        Ok(())
    })();

    engine.stop();
    report(&logger, outcome)
}

/// Asynchronous receive: accept and read happen on the engine's workers,
/// the decoded message reaches `on_received`, and the worker is joined
/// before the call returns.
pub fn async_receive<M, F>(port: &str, on_received: F) -> Result<()>
where
    M: Message + Default,
    F: FnOnce(M) + Send + 'static,
{
    let port = sock::parse_port(port)?;
    let logger: Arc<dyn Logger> = Arc::new(StderrLogger::new());
    let engine = IoEngine::new()?;

    let outcome = (|| {
        engine.run()?;
        let mut listener = sock::bind_listener(SocketAddr::from(([0, 0, 0, 0], port)))?;

        let (done_tx, done_rx) = mpsc::channel();
        let task_engine = Arc::clone(&engine);
        let task_logger = Arc::clone(&logger);
        engine.post(move || {
            match sock::accept_blocking(&mut listener) {
                Ok((socket, _peer)) => {
                    let stream = Stream::accepted(Arc::clone(&task_engine), socket);
                    let callback = Mutex::new(Some(on_received));
                    let parse_logger = Arc::clone(&task_logger);
                    stream.set_read_handler(move |data, _stream| {
                        match M::decode(&data[..]) {
                            Ok(message) => {
                                if let Some(callback) = callback.lock().unwrap().take() {
                                    callback(message);
                                }
                            }
                            Err(e) => parse_logger
                                .log(LogLevel::Error, &format!("[protobuf] parse failed: {}", e)),
                        };
                    });
                    if stream.async_receive().is_ok() {
                        // strand barrier: the read and its handler are done
                        let _ = task_engine.run_serialized(|| {});
                    }
                    let _ = stream.disconnect();
                }
                Err(e) => task_logger.log(
                    LogLevel::Error,
                    &format!("[protobuf] Accept on port {} failed: {}", port, e),
                ),
            }
            let _ = done_tx.send(());
        });

        done_rx
            .recv()
            .map_err(|_| NetworkError::Engine(hermes_io::EngineError::Stopped))?;
        Ok(())
    })();

    engine.stop();
    report(&logger, outcome)
}

fn report<T>(logger: &Arc<dyn Logger>, outcome: Result<T>) -> Result<T> {
    if let Err(e) = &outcome {
        logger.log(LogLevel::Error, &format!("[protobuf] {}", e));
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_port_is_a_configuration_error() {
        #[derive(Clone, PartialEq, Message)]
        struct Probe {
            #[prost(string, tag = "1")]
            text: String,
        }

        let probe = Probe {
            text: "x".into(),
        };
        assert!(matches!(
            send("127.0.0.1", "not-a-port", &probe),
            Err(NetworkError::Configuration(_))
        ));
        assert!(matches!(
            receive::<Probe>("-4"),
            Err(NetworkError::Configuration(_))
        ));
    }
}
