#[cfg(feature = "unstable-mpmc")]
use std::sync::mpmc as channel;
#[cfg(not(feature = "unstable-mpmc"))]
use std::sync::mpsc as channel;
use std::{
    sync::{Arc, Mutex},
    thread::{Builder, JoinHandle},
};

use crate::error::{EngineError, Result};

pub const DEFAULT_POOL_CAPACITY: usize = 4;

type Task = Box<dyn FnOnce() + Send + 'static>;

enum WorkerMessage {
    Task(Task),
    Terminate,
}

/// Fixed-size worker pool draining a shared task channel.
///
/// Tasks queued before shutdown are still executed: the terminate messages
/// sit behind them in the channel.
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: channel::Sender<WorkerMessage>,
}

type ChannelReceiver = channel::Receiver<WorkerMessage>;

impl ThreadPool {
    pub fn new(capacity: usize) -> Result<Self> {
        let (sender, receiver) = channel::channel::<WorkerMessage>();

        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..capacity)
            .map(|id| Worker::new(id, Arc::clone(&receiver)))
            .collect::<Result<Vec<Worker>>>()?;

        Ok(Self { workers, sender })
    }

    pub fn exec<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(WorkerMessage::Task(Box::new(task)))
            .map_err(|_| EngineError::Stopped)
    }

    pub fn workers_len(&self) -> usize {
        self.workers.len()
    }

    /// Asks every worker to exit once the queue ahead of it is drained.
    pub fn terminate(&self) {
        self.workers.iter().for_each(|_| {
            let _ = self.sender.send(WorkerMessage::Terminate);
        });
    }

    /// Joins all workers except the calling thread itself, so a task
    /// running inside the pool can trigger shutdown without deadlocking.
    pub fn join(&mut self) {
        let current = std::thread::current().id();
        self.workers.iter_mut().for_each(|worker| {
            if let Some(t) = worker.take_thread() {
                if t.thread().id() == current {
                    // self-join would deadlock; the worker exits on its own
                    return;
                }
                let _ = t.join();
            }
        });
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.terminate();
        self.join();
    }
}

struct Worker {
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<ChannelReceiver>>) -> Result<Self> {
        let thread = Builder::new()
            .name(format!("hermes-io-worker-{id}"))
            .spawn(move || loop {
                let task = {
                    let receiver = match receiver.lock() {
                        Ok(guard) => guard,
                        Err(_) => break,
                    };
                    if let Ok(message) = receiver.recv() {
                        match message {
                            WorkerMessage::Task(task) => task,
                            WorkerMessage::Terminate => break,
                        }
                    } else {
                        break;
                    }
                };

                task();
            })
            .map_err(|e| EngineError::Init(format!("couldn't spawn worker thread {id}: {e}")))?;

        Ok(Self {
            thread: Some(thread),
        })
    }

    fn take_thread(&mut self) -> Option<JoinHandle<()>> {
        self.thread.take()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[test]
    fn test_thread_pool_creation() {
        let pool = ThreadPool::new(4).unwrap();
        assert_eq!(pool.workers_len(), 4);
    }

    #[test]
    fn test_task_execution() {
        let pool = ThreadPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        pool.exec(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_multiple_tasks() {
        let pool = ThreadPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter_clone = counter.clone();
            pool.exec(move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_pool_cleanup_runs_pending_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(2).unwrap();
            let counter_clone = counter.clone();

            pool.exec(move || {
                std::thread::sleep(Duration::from_millis(50));
                counter_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_from_inside_a_worker() {
        let pool = Arc::new(Mutex::new(Some(ThreadPool::new(2).unwrap())));
        let pool_clone = pool.clone();
        let done = Arc::new(AtomicUsize::new(0));
        let done_clone = done.clone();

        {
            let guard = pool.lock().unwrap();
            guard
                .as_ref()
                .unwrap()
                .exec(move || {
                    // dropping the pool from one of its own workers must not
                    // deadlock on a self-join
                    let taken = pool_clone.lock().unwrap().take();
                    drop(taken);
                    done_clone.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        for _ in 0..50 {
            if done.load(Ordering::SeqCst) == 1 {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("shutdown from inside a worker did not complete");
    }
}
