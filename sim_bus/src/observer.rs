//! Call observer that records everything

use ipc::Payload;
use remote_ipc::{CallError, CallEvent, CallObserver};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Keeps every event a call delivers, in order
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<CallEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CallEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<CallEvent> {
        self.lock().clone()
    }

    /// Values received, in order
    pub fn values(&self) -> Vec<Payload> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                CallEvent::Next(value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// Plain JSON values received; graph payloads are skipped
    pub fn json_values(&self) -> Vec<Value> {
        self.values()
            .into_iter()
            .filter_map(|value| value.as_json().cloned())
            .collect()
    }

    /// The error the call ended with
    pub fn error(&self) -> Option<CallError> {
        self.lock().iter().find_map(|event| match event {
            CallEvent::Error(error) => Some(error.clone()),
            _ => None,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.lock().contains(&CallEvent::Complete)
    }

    /// Number of terminal events; a healthy call never exceeds one
    pub fn terminal_count(&self) -> usize {
        self.lock().iter().filter(|event| event.is_terminal()).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl CallObserver for RecordingObserver {
    fn next(&self, value: Payload) {
        self.lock().push(CallEvent::Next(value));
    }

    fn error(&self, error: CallError) {
        self.lock().push(CallEvent::Error(error));
    }

    fn complete(&self) {
        self.lock().push(CallEvent::Complete);
    }
}
