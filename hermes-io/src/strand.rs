use std::collections::VecDeque;
use std::sync::Mutex;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct StrandState {
    queue: VecDeque<Task>,
    running: bool,
}

/// Serializing dispatch lane.
///
/// Tasks submitted through a strand execute in submission order and never
/// concurrently with one another, whichever pool worker happens to drain
/// them. The `running` flag and the queue sit under one mutex so the
/// idle-to-running transition is atomic with the enqueue.
pub struct Strand {
    state: Mutex<StrandState>,
}

impl Strand {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StrandState {
                queue: VecDeque::new(),
                running: false,
            }),
        }
    }

    /// Enqueues a task. Returns `true` when the lane was idle and the
    /// submitter must now schedule a drain.
    pub fn submit(&self, task: Task) -> bool {
        let mut state = self.state.lock().unwrap();
        state.queue.push_back(task);
        if !state.running {
            state.running = true;
            true
        } else {
            false
        }
    }

    /// Claims the lane for inline execution when it is idle and empty.
    /// The claimant must call [`Strand::drain`] afterwards to run anything
    /// queued meanwhile and release the lane.
    pub fn try_begin(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.running && state.queue.is_empty() {
            state.running = true;
            true
        } else {
            false
        }
    }

    /// Pops the next task, releasing the lane when the queue is empty.
    fn next(&self) -> Option<Task> {
        let mut state = self.state.lock().unwrap();
        match state.queue.pop_front() {
            Some(task) => Some(task),
            None => {
                state.running = false;
                None
            }
        }
    }

    /// Runs queued tasks in order until the queue is empty, then releases
    /// the lane. Must only be called by the thread that owns it (the
    /// scheduled drain task or a successful `try_begin` claimant).
    pub fn drain(&self) {
        while let Some(task) = self.next() {
            task();
        }
    }

    pub fn is_idle(&self) -> bool {
        let state = self.state.lock().unwrap();
        !state.running && state.queue.is_empty()
    }
}

impl Default for Strand {
    fn default() -> Self {
        Self::new()
    }
}
