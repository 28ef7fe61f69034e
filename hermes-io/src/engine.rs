use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use mio::Interest;

use crate::{
    error::{EngineError, Result},
    handler::{EventHandler, IoEvent},
    poll::PollHandle,
    strand::Strand,
    thread_pool::{ThreadPool, DEFAULT_POOL_CAPACITY},
};

pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 150;
pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// Token released by [`IoEngine::stop`]. While it is held the reactor loop
/// keeps pumping even when no operation is currently outstanding, so work
/// posted later still finds live workers.
struct KeepAlive {
    alive: AtomicBool,
}

impl KeepAlive {
    fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Returns `true` for the caller that actually released the token.
    fn release(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }
}

/// Asynchronous I/O execution environment.
///
/// Owns the OS reactor (behind a [`PollHandle`]), a worker pool that
/// executes posted work and ready-event handlers, and a [`Strand`] that
/// serializes work submitted through [`IoEngine::post_serialized`] and
/// [`IoEngine::run_serialized`].
///
/// `run` spawns one dedicated driver thread pumping the reactor loop;
/// additional threads may co-drive it by calling [`IoEngine::run_loop`]
/// themselves. `stop` releases the keep-alive token, wakes the pollers and
/// joins driver and workers; it is safe to call from inside a pool task.
pub struct IoEngine {
    me: Weak<IoEngine>,
    poll: Arc<PollHandle>,
    pool: Mutex<Option<ThreadPool>>,
    strand: Arc<Strand>,
    work: KeepAlive,
    driver: Mutex<Option<JoinHandle<()>>>,
    events_capacity: usize,
    poll_timeout: Duration,
}

impl IoEngine {
    pub fn new() -> Result<Arc<Self>> {
        Self::with_capacity(
            DEFAULT_POOL_CAPACITY,
            DEFAULT_EVENTS_CAPACITY,
            DEFAULT_POLL_TIMEOUT_MS,
        )
    }

    pub fn with_capacity(
        workers: usize,
        events_capacity: usize,
        poll_timeout_ms: u64,
    ) -> Result<Arc<Self>> {
        let poll = Arc::new(PollHandle::new()?);
        let pool = ThreadPool::new(workers)?;
        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            poll,
            pool: Mutex::new(Some(pool)),
            strand: Arc::new(Strand::new()),
            work: KeepAlive::new(),
            driver: Mutex::new(None),
            events_capacity,
            poll_timeout: Duration::from_millis(poll_timeout_ms),
        }))
    }

    /// A live `&self` guarantees the strong count is nonzero, so the
    /// upgrade cannot fail.
    fn shared(&self) -> Arc<IoEngine> {
        self.me.upgrade().expect("engine upgraded while alive")
    }

    /// Ensures one dedicated thread is driving the reactor. Idempotent: a
    /// second call does nothing while the driver is alive.
    pub fn run(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(EngineError::Stopped);
        }
        let mut driver = self
            .driver
            .lock()
            .map_err(|e| EngineError::PoisonedLock(e.to_string()))?;
        if driver.is_some() {
            return Ok(());
        }
        let engine = self.shared();
        let handle = std::thread::Builder::new()
            .name("hermes-io-reactor".into())
            .spawn(move || engine.run_loop())
            .map_err(|e| EngineError::Init(format!("couldn't spawn reactor driver: {e}")))?;
        *driver = Some(handle);
        Ok(())
    }

    /// Pumps the reactor until the keep-alive token is released. Ready
    /// events are dispatched to the pool; the calling thread only polls.
    ///
    /// Worker pools that scale out the reactor call this directly from
    /// each of their threads.
    pub fn run_loop(&self) {
        let mut ready = Vec::with_capacity(self.events_capacity);
        while self.work.is_alive() {
            match self.poll.try_poll(&mut ready, Some(self.poll_timeout)) {
                Ok(Some(0)) => continue,
                Ok(Some(_)) => {
                    for event in ready.drain(..) {
                        self.dispatch(event);
                    }
                }
                // another worker holds the selector; back off and re-check
                Ok(None) => std::thread::sleep(Duration::from_millis(1)),
                Err(_) if !self.work.is_alive() => break,
                Err(_) => continue,
            }
        }
    }

    fn dispatch(&self, event: IoEvent) {
        let registry = self.poll.registry();
        self.post(move || {
            if let Some(entry) = registry.get(&event.token()) {
                entry.val().notify(&event);
            }
        });
    }

    /// Hands `work` to the pool. Work posted after `stop` is silently
    /// discarded.
    pub fn post<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.work.is_alive() {
            return;
        }
        if let Ok(guard) = self.pool.lock() {
            if let Some(pool) = guard.as_ref() {
                let _ = pool.exec(work);
            }
        }
    }

    /// Enqueues `work` on the strand: strand work executes in submission
    /// order and never concurrently, whichever worker drains it.
    pub fn post_serialized<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.work.is_alive() {
            return;
        }
        if self.strand.submit(Box::new(work)) {
            let strand = Arc::clone(&self.strand);
            self.post(move || strand.drain());
        }
    }

    /// Runs `work` under the strand's serialization guarantee and blocks
    /// until it has executed, returning its result.
    ///
    /// When the lane is idle the work runs inline on the calling thread
    /// (dispatch semantics), so the synchronous surface works without any
    /// reactor thread running. Otherwise the work is queued behind the
    /// in-flight strand tasks and the caller waits for its completion.
    pub fn run_serialized<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.strand.try_begin() {
            let value = work();
            self.strand.drain();
            return Ok(value);
        }

        let (tx, rx) = mpsc::channel();
        let task = Box::new(move || {
            let _ = tx.send(work());
        });
        if self.strand.submit(task) {
            // the lane went idle between the checks; drain it ourselves
            self.strand.drain();
        }
        rx.recv()
            .map_err(|_| EngineError::Interrupted("serialized work was dropped".into()))
    }

    /// Releases the keep-alive token, wakes the pollers and joins driver
    /// and workers. Idempotent; pending pool tasks drain first.
    pub fn stop(&self) {
        if !self.work.release() {
            return;
        }
        let _ = self.poll.wake();

        if let Ok(mut driver) = self.driver.lock() {
            if let Some(handle) = driver.take() {
                if handle.thread().id() != std::thread::current().id() {
                    let _ = handle.join();
                }
            }
        }

        let pool = match self.pool.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        drop(pool);
    }

    pub fn is_stopped(&self) -> bool {
        !self.work.is_alive()
    }

    pub fn poll_handle(&self) -> &Arc<PollHandle> {
        &self.poll
    }

    /// Registers an event source whose readiness the reactor dispatches to
    /// `handler` on the pool.
    pub fn register<H, S>(
        &self,
        source: &mut S,
        token: mio::Token,
        interest: Interest,
        handler: H,
    ) -> Result<()>
    where
        H: EventHandler + Send + Sync + 'static,
        S: mio::event::Source + ?Sized,
    {
        self.poll.register(source, token, interest, handler)
    }

    pub fn deregister<S>(&self, source: &mut S, token: mio::Token) -> Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        self.poll.deregister(source, token)
    }
}

impl Drop for IoEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_post_executes_on_a_worker() {
        let engine = IoEngine::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        engine.post(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        engine.stop();
    }

    #[test]
    fn test_post_after_stop_is_discarded() {
        let engine = IoEngine::new().unwrap();
        engine.stop();
        assert!(engine.is_stopped());

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        engine.post(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let engine = IoEngine::new().unwrap();
        engine.run().unwrap();
        engine.stop();
        engine.stop();
        assert!(engine.is_stopped());
    }

    #[test]
    fn test_run_is_idempotent() {
        let engine = IoEngine::new().unwrap();
        engine.run().unwrap();
        engine.run().unwrap();
        engine.stop();
    }

    #[test]
    fn test_run_after_stop_fails() {
        let engine = IoEngine::new().unwrap();
        engine.stop();
        assert!(engine.run().is_err());
    }

    #[test]
    fn test_post_serialized_preserves_order() {
        let engine = IoEngine::new().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..32 {
            let order = order.clone();
            engine.post_serialized(move || {
                order.lock().unwrap().push(i);
            });
        }

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(*order.lock().unwrap(), (0..32).collect::<Vec<_>>());
        engine.stop();
    }

    #[test]
    fn test_run_serialized_returns_value_without_driver() {
        let engine = IoEngine::new().unwrap();
        let value = engine.run_serialized(|| 41 + 1).unwrap();
        assert_eq!(value, 42);
        engine.stop();
    }

    #[test]
    fn test_stop_from_inside_a_posted_task() {
        let engine = IoEngine::new().unwrap();
        engine.run().unwrap();

        let done = Arc::new(AtomicUsize::new(0));
        let done_clone = done.clone();
        let engine_clone = Arc::clone(&engine);
        engine.post(move || {
            engine_clone.stop();
            done_clone.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..100 {
            if done.load(Ordering::SeqCst) == 1 && engine.is_stopped() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("stop from inside a task did not complete");
    }
}
