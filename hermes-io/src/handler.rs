use mio::{event::Event, Interest, Token};
use std::fmt;

const READABLE: u8 = 0b01;
const WRITABLE: u8 = 0b10;

/// Readiness snapshot handed to event handlers.
///
/// `mio::event::Event` is neither `Send` nor `Clone`, so the reactor
/// copies the token and the readiness bits it dispatches on before
/// handing work to the pool.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IoEvent {
    token: Token,
    readiness: u8,
}

impl IoEvent {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_readable(&self) -> bool {
        self.readiness & READABLE != 0
    }

    pub fn is_writable(&self) -> bool {
        self.readiness & WRITABLE != 0
    }

    /// True when this readiness overlaps the given registration interest.
    pub fn matches(&self, interest: Interest) -> bool {
        (interest.is_readable() && self.is_readable())
            || (interest.is_writable() && self.is_writable())
    }
}

impl fmt::Debug for IoEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let readiness = match (self.is_readable(), self.is_writable()) {
            (true, true) => "readable|writable",
            (true, false) => "readable",
            (false, true) => "writable",
            (false, false) => "none",
        };
        write!(f, "IoEvent({:?}, {})", self.token, readiness)
    }
}

impl From<&Event> for IoEvent {
    fn from(event: &Event) -> Self {
        let mut readiness = 0;
        if event.is_readable() {
            readiness |= READABLE;
        }
        if event.is_writable() {
            readiness |= WRITABLE;
        }
        Self {
            token: event.token(),
            readiness,
        }
    }
}

/// Callback invoked by the reactor when a registered source becomes ready.
///
/// Handlers run on worker threads from the engine's pool, possibly
/// concurrently for different sources, so implementations must be
/// `Send + Sync`.
pub trait EventHandler {
    fn handle_event(&self, event: &IoEvent);
}

/// A registered handler together with the interest it was registered
/// under. The entry owns the interest filtering, so the reactor loop
/// forwards events blindly and spurious readiness never reaches a
/// handler that did not ask for it.
pub struct HandlerEntry {
    handler: Box<dyn EventHandler + Send + Sync>,
    interest: Interest,
}

impl HandlerEntry {
    pub(crate) fn new<H>(handler: H, interest: Interest) -> Self
    where
        H: EventHandler + Send + Sync + 'static,
    {
        HandlerEntry {
            handler: Box::new(handler),
            interest,
        }
    }

    /// Invokes the handler when the event overlaps the registered
    /// interest; drops it otherwise.
    pub fn notify(&self, event: &IoEvent) {
        if event.matches(self.interest) {
            self.handler.handle_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn event(token: Token, readable: bool, writable: bool) -> IoEvent {
        let mut readiness = 0;
        if readable {
            readiness |= READABLE;
        }
        if writable {
            readiness |= WRITABLE;
        }
        IoEvent { token, readiness }
    }

    struct CountingHandler {
        hits: Arc<AtomicUsize>,
    }

    impl EventHandler for CountingHandler {
        fn handle_event(&self, _event: &IoEvent) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_matches_follows_interest_overlap() {
        let readable = event(Token(1), true, false);
        assert!(readable.matches(Interest::READABLE));
        assert!(!readable.matches(Interest::WRITABLE));
        assert!(readable.matches(Interest::READABLE | Interest::WRITABLE));

        let idle = event(Token(1), false, false);
        assert!(!idle.matches(Interest::READABLE | Interest::WRITABLE));
    }

    #[test]
    fn test_notify_filters_on_registered_interest() {
        let hits = Arc::new(AtomicUsize::new(0));
        let entry = HandlerEntry::new(
            CountingHandler { hits: hits.clone() },
            Interest::READABLE,
        );

        entry.notify(&event(Token(7), false, true));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        entry.notify(&event(Token(7), true, false));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
