//! # Simulated clock
//!
//! Implements the service [`Scheduler`] on virtual time. Tasks never run
//! on their own; a test moves the clock with [`SimScheduler::advance`] and
//! due tasks run in deadline order, ties in the order they were scheduled.

use remote_ipc::{Scheduler, Task, TimerId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct Clock {
    now: Duration,
    next_id: u64,
    timers: BTreeMap<(Duration, u64), Task>,
    deadlines: HashMap<u64, Duration>,
}

impl Clock {
    /// Removes the earliest task due at or before `limit`
    fn pop_due(&mut self, limit: Duration) -> Option<(Duration, Task)> {
        let (&(deadline, id), _) = self.timers.iter().next()?;
        if deadline > limit {
            return None;
        }
        self.deadlines.remove(&id);
        self.timers
            .remove(&(deadline, id))
            .map(|task| (deadline, task))
    }
}

/// Scheduler on virtual time
#[derive(Default)]
pub struct SimScheduler {
    clock: Mutex<Clock>,
}

impl SimScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn clock(&self) -> MutexGuard<'_, Clock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Virtual time elapsed since creation
    pub fn now(&self) -> Duration {
        self.clock().now
    }

    /// Number of tasks waiting
    pub fn pending(&self) -> usize {
        self.clock().timers.len()
    }

    /// Moves the clock forward, running every task that comes due
    ///
    /// Tasks scheduled by running tasks also run if they fall inside the
    /// window. Returns how many tasks ran.
    pub fn advance(&self, delta: Duration) -> usize {
        let target = self.now() + delta;
        let mut ran = 0;
        loop {
            let due = {
                let mut clock = self.clock();
                let due = clock.pop_due(target);
                if let Some((deadline, _)) = &due {
                    clock.now = *deadline;
                }
                due
            };
            match due {
                Some((_, task)) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        self.clock().now = target;
        ran
    }

    /// Runs tasks due right now, such as deferred work
    pub fn run_due(&self) -> usize {
        self.advance(Duration::ZERO)
    }

    /// Jumps through time until no task is left; returns how many ran
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = {
                let clock = self.clock();
                clock
                    .timers
                    .keys()
                    .next()
                    .map(|(deadline, _)| deadline.saturating_sub(clock.now))
            };
            match next {
                Some(delta) => ran += self.advance(delta),
                None => return ran,
            }
        }
    }
}

impl Scheduler for SimScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let mut clock = self.clock();
        let id = clock.next_id;
        clock.next_id += 1;
        let deadline = clock.now + delay;
        clock.timers.insert((deadline, id), task);
        clock.deadlines.insert(id, deadline);
        TimerId::new(id)
    }

    fn cancel(&self, timer: TimerId) {
        let mut clock = self.clock();
        if let Some(deadline) = clock.deadlines.remove(&timer.as_u64()) {
            clock.timers.remove(&(deadline, timer.as_u64()));
        }
    }
}

impl fmt::Debug for SimScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clock = self.clock();
        f.debug_struct("SimScheduler")
            .field("now", &clock.now)
            .field("pending", &clock.timers.len())
            .finish()
    }
}
