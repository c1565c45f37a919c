use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Locks a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializes the notifications of one call across threads
///
/// Re-entrant for the owning thread: an observer may end its own call from
/// inside a notification.
#[derive(Default)]
pub(crate) struct DeliveryGate {
    owner: Mutex<Option<(ThreadId, usize)>>,
    released: Condvar,
}

impl DeliveryGate {
    pub(crate) fn enter(&self) -> GatePass<'_> {
        let me = thread::current().id();
        let mut owner = lock(&self.owner);
        loop {
            match owner.as_mut() {
                None => {
                    *owner = Some((me, 1));
                    break;
                }
                Some((id, depth)) if *id == me => {
                    *depth += 1;
                    break;
                }
                Some(_) => {
                    owner = self
                        .released
                        .wait(owner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        GatePass { gate: self }
    }
}

pub(crate) struct GatePass<'a> {
    gate: &'a DeliveryGate,
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        let mut owner = lock(&self.gate.owner);
        if let Some((_, depth)) = owner.as_mut() {
            *depth -= 1;
            if *depth == 0 {
                *owner = None;
                self.gate.released.notify_all();
            }
        }
    }
}
