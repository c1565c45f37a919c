//! Test doubles shared by the unit tests

use crate::error::CallError;
use crate::observer::{CallEvent, CallObserver};
use crate::scheduler::{Scheduler, Task, TimerId};
use core_types::ListenerId;
use ipc::{Emitter, HandlerId, InboundHandler, Listener, Payload, TransportError};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scheduler that only runs tasks when told to
#[derive(Default)]
pub(crate) struct ManualScheduler {
    next: AtomicU64,
    tasks: Mutex<Vec<(TimerId, Duration, Task)>>,
}

impl ManualScheduler {
    /// Runs every queued task, including ones queued while running
    pub(crate) fn run_all(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
            if tasks.is_empty() {
                return;
            }
            for (_, _, task) in tasks {
                task();
            }
        }
    }

    /// Runs zero-delay tasks only
    pub(crate) fn run_deferred(&self) {
        let due: Vec<Task> = {
            let mut tasks = self.tasks.lock().unwrap();
            let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut *tasks)
                .into_iter()
                .partition(|(_, delay, _)| delay.is_zero());
            *tasks = later;
            due.into_iter().map(|(_, _, task)| task).collect()
        };
        for task in due {
            task();
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId::new(self.next.fetch_add(1, Ordering::SeqCst));
        self.tasks.lock().unwrap().push((id, delay, task));
        id
    }

    fn cancel(&self, timer: TimerId) {
        self.tasks.lock().unwrap().retain(|(id, _, _)| *id != timer);
    }
}

/// In-memory transport that delivers every emitted frame to the handlers
/// of its topic, synchronously
pub(crate) struct LoopTransport {
    id: ListenerId,
    next_handler: AtomicU64,
    sent: Mutex<Vec<(String, Value)>>,
    handlers: Mutex<Vec<(String, HandlerId, InboundHandler)>>,
}

impl LoopTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ListenerId::new(),
            next_handler: AtomicU64::new(1),
            sent: Mutex::new(Vec::new()),
            handlers: Mutex::new(Vec::new()),
        })
    }

    /// Hands a frame to the handlers of `topic` without recording it
    pub(crate) fn deliver(&self, topic: &str, frame: Value) {
        self.deliver_args(topic, &[frame]);
    }

    /// Like [`deliver`](Self::deliver), with arbitrary listener arguments
    pub(crate) fn deliver_args(&self, topic: &str, args: &[Value]) {
        let handlers: Vec<InboundHandler> = self
            .handlers
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, _, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(args);
        }
    }

    pub(crate) fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// `type` of every emitted frame, in order
    pub(crate) fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|frame| frame["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub(crate) fn handler_count(&self, topic: &str) -> usize {
        self.handlers
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == topic)
            .count()
    }
}

impl Emitter for LoopTransport {
    fn emit(&self, topic: &str, frame: Value) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((topic.to_string(), frame.clone()));
        self.deliver(topic, frame);
        Ok(())
    }
}

impl Listener for LoopTransport {
    fn id(&self) -> ListenerId {
        self.id
    }

    fn on(&self, topic: &str, handler: InboundHandler) -> Result<HandlerId, TransportError> {
        let id = HandlerId::new(self.next_handler.fetch_add(1, Ordering::SeqCst));
        self.handlers
            .lock()
            .unwrap()
            .push((topic.to_string(), id, handler));
        Ok(id)
    }

    fn off(&self, topic: &str, handler: HandlerId) {
        self.handlers
            .lock()
            .unwrap()
            .retain(|(t, id, _)| !(t == topic && *id == handler));
    }
}

/// Observer collecting call events
#[derive(Default)]
pub(crate) struct Events(Mutex<Vec<CallEvent>>);

impl Events {
    pub(crate) fn take(&self) -> Vec<CallEvent> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl CallObserver for Events {
    fn next(&self, value: Payload) {
        self.0.lock().unwrap().push(CallEvent::Next(value));
    }

    fn error(&self, error: CallError) {
        self.0.lock().unwrap().push(CallEvent::Error(error));
    }

    fn complete(&self) {
        self.0.lock().unwrap().push(CallEvent::Complete);
    }
}
