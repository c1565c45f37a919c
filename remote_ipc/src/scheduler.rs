//! # Timers and deferred work
//!
//! Call timeouts and the responder's deferred cleanup both need "run this
//! later". The engine asks a [`Scheduler`] for it, so tests can swap the
//! real clock for a virtual one and step through time deterministically.

use crate::sync::lock;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Work handed to a scheduler
pub type Task = Box<dyn FnOnce() + Send>;

/// Handle of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timer({})", self.0)
    }
}

/// Source of delayed execution
pub trait Scheduler: Send + Sync {
    /// Runs `task` once `delay` has elapsed
    fn schedule(&self, delay: Duration, task: Task) -> TimerId;

    /// Drops a task that has not run yet; unknown ids are ignored
    fn cancel(&self, timer: TimerId);

    /// Runs `task` at the next scheduling opportunity
    fn defer(&self, task: Task) -> TimerId {
        self.schedule(Duration::ZERO, task)
    }
}

struct TimerQueue {
    next_id: u64,
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    tasks: HashMap<u64, Task>,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<TimerQueue>,
    wake: Condvar,
}

/// Real-time scheduler backed by one worker thread
///
/// Tasks run on the worker in deadline order; equal deadlines run in the
/// order they were scheduled. Dropping the scheduler stops the worker and
/// discards tasks that have not run.
pub struct ThreadScheduler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(TimerQueue {
                next_id: 1,
                deadlines: BinaryHeap::new(),
                tasks: HashMap::new(),
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("remote-ipc-timers".to_string())
            .spawn(move || run_worker(&worker_shared))
            .ok();

        Self { shared, worker }
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        lock(&self.shared.queue).tasks.len()
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let deadline = Instant::now() + delay;
        let mut queue = lock(&self.shared.queue);
        let id = queue.next_id;
        queue.next_id += 1;
        queue.deadlines.push(Reverse((deadline, id)));
        queue.tasks.insert(id, task);
        drop(queue);
        self.shared.wake.notify_one();
        TimerId(id)
    }

    fn cancel(&self, timer: TimerId) {
        // The heap entry stays behind and is skipped when it comes due
        lock(&self.shared.queue).tasks.remove(&timer.0);
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        lock(&self.shared.queue).shutdown = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            // A task may own the last handle; the worker cannot join itself
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

fn run_worker(shared: &Shared) {
    let mut queue = lock(&shared.queue);
    loop {
        if queue.shutdown {
            return;
        }

        let next = queue.deadlines.peek().map(|Reverse(entry)| *entry);
        match next {
            None => {
                queue = shared
                    .wake
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some((deadline, id)) => {
                let now = Instant::now();
                if deadline > now {
                    queue = shared
                        .wake
                        .wait_timeout(queue, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                    continue;
                }

                queue.deadlines.pop();
                if let Some(task) = queue.tasks.remove(&id) {
                    drop(queue);
                    task();
                    queue = lock(&shared.queue);
                }
            }
        }
    }
}
