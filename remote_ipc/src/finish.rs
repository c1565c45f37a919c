//! One-shot finish signal
//!
//! A caller can hand a [`FinishSignal`] to a call to end it from the
//! outside: resolving completes the call locally and tells the responder
//! to stop, rejecting fails it with the given error.

use crate::sync::lock;
use ipc::RemoteError;
use std::fmt;
use std::sync::{Arc, Mutex};

/// How a finish signal settled
#[derive(Debug, Clone, PartialEq)]
pub enum FinishOutcome {
    Resolved,
    Rejected(RemoteError),
}

type SettleCallback = Box<dyn FnOnce(&FinishOutcome) + Send>;

#[derive(Default)]
struct FinishState {
    outcome: Option<FinishOutcome>,
    callbacks: Vec<SettleCallback>,
}

/// Observing half, handed to calls
#[derive(Clone)]
pub struct FinishSignal {
    state: Arc<Mutex<FinishState>>,
}

/// Settling half, kept by whoever decides when calls end
#[derive(Clone)]
pub struct FinishTrigger {
    state: Arc<Mutex<FinishState>>,
}

impl FinishSignal {
    /// Creates an unsettled signal and its trigger
    pub fn new() -> (FinishSignal, FinishTrigger) {
        let state = Arc::new(Mutex::new(FinishState::default()));
        (
            FinishSignal {
                state: state.clone(),
            },
            FinishTrigger { state },
        )
    }

    /// Creates a signal that is already resolved
    pub fn resolved() -> Self {
        let (signal, trigger) = Self::new();
        trigger.resolve();
        signal
    }

    /// Creates a signal that is already rejected
    pub fn rejected(error: RemoteError) -> Self {
        let (signal, trigger) = Self::new();
        trigger.reject(error);
        signal
    }

    /// Runs `callback` once the signal settles, or now if it already has
    pub fn on_settle<F>(&self, callback: F)
    where
        F: FnOnce(&FinishOutcome) + Send + 'static,
    {
        let outcome = {
            let mut state = lock(&self.state);
            match &state.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    state.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&outcome);
    }

    pub fn outcome(&self) -> Option<FinishOutcome> {
        lock(&self.state).outcome.clone()
    }

    pub fn is_settled(&self) -> bool {
        lock(&self.state).outcome.is_some()
    }
}

impl fmt::Debug for FinishSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinishSignal")
            .field("outcome", &self.outcome())
            .finish()
    }
}

impl FinishTrigger {
    /// Resolves the signal; false if it had already settled
    pub fn resolve(&self) -> bool {
        self.settle(FinishOutcome::Resolved)
    }

    /// Rejects the signal; false if it had already settled
    pub fn reject(&self, error: RemoteError) -> bool {
        self.settle(FinishOutcome::Rejected(error))
    }

    fn settle(&self, outcome: FinishOutcome) -> bool {
        let callbacks = {
            let mut state = lock(&self.state);
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback(&outcome);
        }
        true
    }
}

impl fmt::Debug for FinishTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FinishTrigger(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callbacks_run_once_on_settle() {
        let (signal, trigger) = FinishSignal::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        signal.on_settle(move |outcome| sink.lock().unwrap().push(outcome.clone()));
        assert!(!signal.is_settled());

        assert!(trigger.resolve());
        assert!(!trigger.reject(RemoteError::new("Error", "late")));
        assert_eq!(*seen.lock().unwrap(), vec![FinishOutcome::Resolved]);
    }

    #[test]
    fn test_late_subscriber_sees_outcome() {
        let signal = FinishSignal::rejected(RemoteError::new("Aborted", "stop"));
        let seen = Arc::new(Mutex::new(None));

        let sink = seen.clone();
        signal.on_settle(move |outcome| *sink.lock().unwrap() = Some(outcome.clone()));

        assert_eq!(
            *seen.lock().unwrap(),
            Some(FinishOutcome::Rejected(RemoteError::new("Aborted", "stop")))
        );
    }

    #[test]
    fn test_resolved_constructor() {
        assert_eq!(FinishSignal::resolved().outcome(), Some(FinishOutcome::Resolved));
    }
}
