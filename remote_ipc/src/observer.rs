//! Caller-side observers

use crate::error::CallError;
use crate::sync::lock;
use ipc::Payload;
use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::Mutex;

/// Receives the events of one call
///
/// A call delivers zero or more `next`, then at most one `error` or
/// `complete`. Disposing a call delivers nothing.
pub trait CallObserver: Send + Sync {
    fn next(&self, value: Payload);
    fn error(&self, error: CallError);
    fn complete(&self);
}

/// One event of a call, for pull-style consumers
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    Next(Payload),
    Error(CallError),
    Complete,
}

impl CallEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallEvent::Next(_))
    }
}

type NextFn = Box<dyn Fn(Payload) + Send + Sync>;
type ErrorFn = Box<dyn Fn(CallError) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;

/// Observer built from closures; unset callbacks do nothing
pub struct FnObserver {
    next: NextFn,
    error: ErrorFn,
    complete: CompleteFn,
}

impl FnObserver {
    pub fn new() -> Self {
        Self {
            next: Box::new(|_| {}),
            error: Box::new(|_| {}),
            complete: Box::new(|| {}),
        }
    }

    pub fn on_next(mut self, callback: impl Fn(Payload) + Send + Sync + 'static) -> Self {
        self.next = Box::new(callback);
        self
    }

    pub fn on_error(mut self, callback: impl Fn(CallError) + Send + Sync + 'static) -> Self {
        self.error = Box::new(callback);
        self
    }

    pub fn on_complete(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Box::new(callback);
        self
    }
}

impl Default for FnObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FnObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnObserver(..)")
    }
}

impl CallObserver for FnObserver {
    fn next(&self, value: Payload) {
        (self.next)(value)
    }

    fn error(&self, error: CallError) {
        (self.error)(error)
    }

    fn complete(&self) {
        (self.complete)()
    }
}

/// Forwards events into an mpsc channel; a dropped receiver is ignored
pub(crate) struct ChannelObserver {
    sender: Mutex<Sender<CallEvent>>,
}

impl ChannelObserver {
    pub(crate) fn new(sender: Sender<CallEvent>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }

    fn send(&self, event: CallEvent) {
        let _ = lock(&self.sender).send(event);
    }
}

impl CallObserver for ChannelObserver {
    fn next(&self, value: Payload) {
        self.send(CallEvent::Next(value));
    }

    fn error(&self, error: CallError) {
        self.send(CallEvent::Error(error));
    }

    fn complete(&self) {
        self.send(CallEvent::Complete);
    }
}
