use lockfree::map::Map;
use mio::{Events, Interest, Poll, Token, Waker};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::{
    error::{EngineError, Result},
    handler::{EventHandler, HandlerEntry, IoEvent},
};

/// Token reserved for the internal waker.
pub const WAKER_TOKEN: Token = Token(0);

type Registry = Arc<Map<Token, HandlerEntry>>;

/// Shared handle on the OS reactor.
///
/// Wraps `mio::Poll` so that many threads can register sources and pump
/// events against the same poller. Registrations live in a lock-free map
/// keyed by token; polling itself takes the write lock, so only one thread
/// drives the OS selector at a time while the others wait their turn.
pub struct PollHandle {
    poller: Arc<RwLock<Poll>>,
    registry: Registry,
    waker: Arc<Waker>,
    next_token: AtomicUsize,
}

impl PollHandle {
    pub fn new() -> Result<Self> {
        let poller = Arc::new(RwLock::new(Poll::new()?));
        let waker = {
            let guard = poller
                .read()
                .map_err(|e| EngineError::PoisonedLock(e.to_string()))?;
            Waker::new(guard.registry(), WAKER_TOKEN)?
        };
        let registry: Registry = Arc::new(Map::new());
        Ok(PollHandle {
            poller,
            registry,
            waker: Arc::new(waker),
            next_token: AtomicUsize::new(WAKER_TOKEN.0 + 1),
        })
    }

    /// Allocates a token that is unique for the lifetime of this handle.
    pub fn next_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    pub fn register<H, S>(
        &self,
        src: &mut S,
        token: Token,
        interest: Interest,
        handler: H,
    ) -> Result<()>
    where
        H: EventHandler + Send + Sync + 'static,
        S: mio::event::Source + ?Sized,
    {
        let entry = HandlerEntry::new(handler, interest);

        let poller = self
            .poller
            .read()
            .map_err(|e| EngineError::PoisonedLock(e.to_string()))?;
        src.register(poller.registry(), token, interest)?;

        self.registry.insert(token, entry);
        Ok(())
    }

    pub fn deregister<S>(&self, source: &mut S, token: Token) -> Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        let poller = self
            .poller
            .read()
            .map_err(|e| EngineError::PoisonedLock(e.to_string()))?;
        poller.registry().deregister(source)?;

        self.registry.remove(&token);
        Ok(())
    }

    /// Polls once and copies ready events into `out`, skipping the waker.
    pub fn poll(&self, out: &mut Vec<IoEvent>, timeout: Option<Duration>) -> Result<usize> {
        let mut events = Events::with_capacity(out.capacity().max(64));
        {
            let mut poller = self
                .poller
                .write()
                .map_err(|e| EngineError::PoisonedLock(e.to_string()))?;
            poller.poll(&mut events, timeout)?;
        }

        out.clear();
        out.extend(
            events
                .iter()
                .filter(|e| e.token() != WAKER_TOKEN)
                .map(IoEvent::from),
        );
        Ok(out.len())
    }

    /// Like [`PollHandle::poll`] but yields `None` instead of waiting when
    /// another thread is already driving the selector, so co-driving
    /// workers back off instead of queueing on the lock.
    pub fn try_poll(&self, out: &mut Vec<IoEvent>, timeout: Option<Duration>) -> Result<Option<usize>> {
        let mut events = Events::with_capacity(out.capacity().max(64));
        {
            let mut poller = match self.poller.try_write() {
                Ok(guard) => guard,
                Err(std::sync::TryLockError::WouldBlock) => return Ok(None),
                Err(std::sync::TryLockError::Poisoned(e)) => {
                    return Err(EngineError::PoisonedLock(e.to_string()))
                }
            };
            poller.poll(&mut events, timeout)?;
        }

        out.clear();
        out.extend(
            events
                .iter()
                .filter(|e| e.token() != WAKER_TOKEN)
                .map(IoEvent::from),
        );
        Ok(Some(out.len()))
    }

    pub fn wake(&self) -> Result<()> {
        Ok(self.waker.wake()?)
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::event::Source;
    use std::sync::atomic::AtomicBool;

    struct TestSource;
    impl Source for TestSource {
        fn register(
            &mut self,
            _registry: &mio::Registry,
            _token: Token,
            _interests: Interest,
        ) -> std::io::Result<()> {
            Ok(())
        }

        fn reregister(
            &mut self,
            _registry: &mio::Registry,
            _token: Token,
            _interests: Interest,
        ) -> std::io::Result<()> {
            Ok(())
        }

        fn deregister(&mut self, _registry: &mio::Registry) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct NoopHandler;
    impl EventHandler for NoopHandler {
        fn handle_event(&self, _event: &IoEvent) {}
    }

    #[test]
    fn test_poll_with_timeout() {
        let poller = PollHandle::new().unwrap();
        let mut out = Vec::with_capacity(64);
        let n = poller
            .poll(&mut out, Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_wake() {
        let poller = PollHandle::new().unwrap();
        assert!(poller.wake().is_ok());
    }

    #[test]
    fn test_token_allocation_is_unique() {
        let poller = PollHandle::new().unwrap();
        let a = poller.next_token();
        let b = poller.next_token();
        assert_ne!(a, b);
        assert_ne!(a, WAKER_TOKEN);
        assert_ne!(b, WAKER_TOKEN);
    }

    #[test]
    fn test_register_deregister() {
        let poller = PollHandle::new().unwrap();
        let mut source = TestSource;
        let token = poller.next_token();

        struct FlagHandler {
            called: Arc<AtomicBool>,
        }

        impl EventHandler for FlagHandler {
            fn handle_event(&self, _event: &IoEvent) {
                self.called.store(true, Ordering::SeqCst);
            }
        }

        let handler = FlagHandler {
            called: Arc::new(AtomicBool::new(false)),
        };

        assert!(
            poller
                .register(&mut source, token, Interest::READABLE, handler)
                .is_ok(),
            "Failed to register source"
        );
        assert!(
            poller.registry.iter().any(|entry| entry.0 == token),
            "Token not found in registry"
        );

        assert!(
            poller.deregister(&mut source, token).is_ok(),
            "Failed to deregister source"
        );
        assert!(
            !poller.registry.iter().any(|entry| entry.0 == token),
            "Token should have been removed from registry"
        );
    }

    #[test]
    fn test_multiple_handlers() {
        let poller = PollHandle::new().unwrap();
        let mut src1 = TestSource;
        let mut src2 = TestSource;
        let t1 = poller.next_token();
        let t2 = poller.next_token();

        poller
            .register(&mut src1, t1, Interest::READABLE, NoopHandler)
            .unwrap();
        poller
            .register(&mut src2, t2, Interest::WRITABLE, NoopHandler)
            .unwrap();

        assert_eq!(poller.registry.iter().count(), 2);
    }
}
