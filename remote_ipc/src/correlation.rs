//! # Call correlation
//!
//! Every in-flight call is a [`PendingCall`] filed under its `uid` in the
//! [`ChannelCalls`] of the (listener, topic) pair it listens on. Each pair
//! gets exactly one inbound handler, installed by the first call and shared
//! by every call after it.
//!
//! A pending call settles once. Completion, remote error, timeout, finish
//! signal, disposal and listener release all race for the same flag; the
//! winner removes the entry (only if it is still this call) and notifies,
//! everybody else does nothing. Value and terminal notifications of one
//! call pass through its [`DeliveryGate`], so a terminal raised on another
//! thread never overtakes a value that already passed the settled check.

use crate::error::CallError;
use crate::finish::{FinishOutcome, FinishSignal};
use crate::observer::CallObserver;
use crate::options::NotificationWrapper;
use crate::scheduler::{Scheduler, TimerId};
use crate::sync::{lock, DeliveryGate};
use core_types::{CallId, ListenerId};
use ipc::{
    Emitter, Frame, HandlerId, InboundHandler, Listener, RemoteError, TransportError,
    UnsubscribeFrame, ValueCodec,
};
use serde_json::Value;
use services_logger::{LogEntry, LogLevel, SharedLogger};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Everything a pending call needs besides its uid
#[derive(Clone)]
pub(crate) struct CallSpec {
    pub name: String,
    /// Topic requests and unsubscribes are sent on
    pub channel: String,
    pub timeout: Duration,
    pub codec: ValueCodec,
    pub observer: Arc<dyn CallObserver>,
    pub wrapper: NotificationWrapper,
    pub emitter: Arc<dyn Emitter>,
    pub scheduler: Arc<dyn Scheduler>,
    pub logger: SharedLogger,
}

#[derive(Default)]
struct PendingState {
    settled: bool,
    request_sent: bool,
    timer_armed: bool,
    timer: Option<TimerId>,
}

enum Ending {
    Complete,
    Error(CallError),
}

/// One call waiting for responses
pub(crate) struct PendingCall {
    uid: CallId,
    spec: CallSpec,
    table: Weak<ChannelCalls>,
    state: Mutex<PendingState>,
    delivery: DeliveryGate,
}

impl PendingCall {
    pub(crate) fn uid(&self) -> &CallId {
        &self.uid
    }

    pub(crate) fn is_settled(&self) -> bool {
        lock(&self.state).settled
    }

    /// Starts the timeout; a response clears it
    pub(crate) fn arm_timeout(self: &Arc<Self>) {
        {
            let mut state = lock(&self.state);
            if state.settled {
                return;
            }
            state.timer_armed = true;
        }

        let call = Arc::downgrade(self);
        let timer = self.spec.scheduler.schedule(
            self.spec.timeout,
            Box::new(move || {
                if let Some(call) = call.upgrade() {
                    call.expire();
                }
            }),
        );

        let mut state = lock(&self.state);
        if state.timer_armed && !state.settled {
            state.timer = Some(timer);
        } else {
            drop(state);
            self.spec.scheduler.cancel(timer);
        }
    }

    /// Ends the call when `signal` settles
    pub(crate) fn watch_finish(self: &Arc<Self>, signal: &FinishSignal) {
        let call = Arc::downgrade(self);
        signal.on_settle(move |outcome| {
            if let Some(call) = call.upgrade() {
                call.finish(outcome);
            }
        });
    }

    /// Emits the request unless the call already ended
    pub(crate) fn send(&self, request: Value) {
        {
            let mut state = lock(&self.state);
            if state.settled {
                return;
            }
            state.request_sent = true;
        }
        if let Err(error) = self.spec.emitter.emit(&self.spec.channel, request) {
            self.spec.logger.log(
                self.log(LogLevel::Error, "caller.emit_failed").with_field("error", &error),
            );
            self.end(Some(Ending::Error(CallError::Transport(error))), false);
        }
    }

    /// Handles one response frame addressed to this call
    fn receive(&self, data: Option<Value>, error: Option<Value>, complete: bool) {
        if let Some(error) = error {
            let remote = RemoteError::from_wire(&error);
            self.end(Some(Ending::Error(CallError::Remote(remote))), false);
            return;
        }
        if let Some(data) = data {
            self.next(data);
        }
        if complete {
            self.end(Some(Ending::Complete), false);
        }
    }

    fn next(&self, data: Value) {
        if !self.clear_timer() {
            return;
        }
        let decoded = self.spec.codec.decode(data);

        let _pass = self.delivery.enter();
        if self.is_settled() {
            return;
        }
        match decoded {
            Ok(value) => self.notify(move |observer| observer.next(value)),
            Err(error) => {
                let error = CallError::Codec(error.to_string());
                self.end(Some(Ending::Error(error)), true);
            }
        }
    }

    fn expire(&self) {
        if !lock(&self.state).timer_armed {
            return;
        }
        let error = CallError::Timeout {
            name: self.spec.name.clone(),
            channel: self.spec.channel.clone(),
            timeout: self.spec.timeout,
        };
        if self.end(Some(Ending::Error(error)), true) {
            self.spec.logger.log(
                self.log(LogLevel::Error, "caller.timeout")
                    .with_field("timeout_ms", self.spec.timeout.as_millis()),
            );
        }
    }

    fn finish(&self, outcome: &FinishOutcome) {
        let ending = match outcome {
            FinishOutcome::Resolved => Ending::Complete,
            FinishOutcome::Rejected(error) => Ending::Error(CallError::Finished(error.clone())),
        };
        self.end(Some(ending), true);
    }

    /// Fails the call locally, before the responder knows about it
    pub(crate) fn fail(&self, error: CallError) -> bool {
        self.end(Some(Ending::Error(error)), false)
    }

    /// Drops the call without notifying; true if it was still pending
    pub(crate) fn dispose(&self) -> bool {
        let disposed = self.end(None, true);
        if disposed {
            self.spec
                .logger
                .log(self.log(LogLevel::Info, "caller.dispose"));
        }
        disposed
    }

    fn release(&self) -> bool {
        let error = CallError::Released {
            name: self.spec.name.clone(),
        };
        self.end(Some(Ending::Error(error)), true)
    }

    /// Settles the call; false if something else got there first
    fn end(&self, ending: Option<Ending>, tell_peer: bool) -> bool {
        let request_sent = {
            let _pass = self.delivery.enter();
            let Some(request_sent) = self.settle() else {
                return false;
            };
            match ending {
                Some(Ending::Complete) => self.notify(|observer| observer.complete()),
                Some(Ending::Error(error)) => {
                    self.notify(move |observer| observer.error(error))
                }
                None => {}
            }
            request_sent
        };

        if tell_peer && request_sent {
            self.send_unsubscribe();
        }
        true
    }

    fn settle(&self) -> Option<bool> {
        let (timer, request_sent) = {
            let mut state = lock(&self.state);
            if state.settled {
                return None;
            }
            state.settled = true;
            state.timer_armed = false;
            (state.timer.take(), state.request_sent)
        };
        if let Some(timer) = timer {
            self.spec.scheduler.cancel(timer);
        }
        if let Some(table) = self.table.upgrade() {
            table.remove_if(&self.uid, self);
        }
        Some(request_sent)
    }

    /// Clears the timeout; false once the call has settled
    fn clear_timer(&self) -> bool {
        let timer = {
            let mut state = lock(&self.state);
            if state.settled {
                return false;
            }
            state.timer_armed = false;
            state.timer.take()
        };
        if let Some(timer) = timer {
            self.spec.scheduler.cancel(timer);
        }
        true
    }

    fn send_unsubscribe(&self) {
        let frame = Frame::Unsubscribe(UnsubscribeFrame {
            uid: self.uid.clone(),
            name: Some(self.spec.name.clone()),
        });
        let sent = frame
            .to_value()
            .map_err(|error| TransportError::Rejected(error.to_string()))
            .and_then(|value| self.spec.emitter.emit(&self.spec.channel, value));
        if let Err(error) = sent {
            self.spec.logger.log(
                self.log(LogLevel::Error, "caller.unsubscribe_failed")
                    .with_field("error", &error),
            );
        }
    }

    fn notify<F>(&self, deliver: F)
    where
        F: FnOnce(&dyn CallObserver) + Send + 'static,
    {
        let observer = self.spec.observer.clone();
        self.spec
            .wrapper
            .run(Box::new(move || deliver(observer.as_ref())));
    }

    fn log(&self, level: LogLevel, message: &str) -> LogEntry {
        LogEntry::new(level, message)
            .with_field("channel", &self.spec.channel)
            .with_field("name", &self.spec.name)
            .with_field("uid", &self.uid)
    }
}

/// Calls waiting on one (listener, topic) pair
pub(crate) struct ChannelCalls {
    handler: Mutex<Option<HandlerId>>,
    calls: Mutex<HashMap<CallId, Arc<PendingCall>>>,
}

impl ChannelCalls {
    fn new() -> Self {
        Self {
            handler: Mutex::new(None),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Files a new call under a fresh uid
    pub(crate) fn register(self: &Arc<Self>, spec: CallSpec) -> Arc<PendingCall> {
        let mut calls = lock(&self.calls);
        let mut uid = CallId::new();
        while calls.contains_key(&uid) {
            uid = CallId::new();
        }
        let call = Arc::new(PendingCall {
            uid: uid.clone(),
            spec,
            table: Arc::downgrade(self),
            state: Mutex::new(PendingState::default()),
            delivery: DeliveryGate::default(),
        });
        calls.insert(uid, call.clone());
        call
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.calls).len()
    }

    fn get(&self, uid: &CallId) -> Option<Arc<PendingCall>> {
        lock(&self.calls).get(uid).cloned()
    }

    fn remove_if(&self, uid: &CallId, call: &PendingCall) -> bool {
        let mut calls = lock(&self.calls);
        match calls.get(uid) {
            Some(entry) if std::ptr::eq(Arc::as_ptr(entry), call) => {
                calls.remove(uid);
                true
            }
            _ => false,
        }
    }

    fn drain(&self) -> Vec<Arc<PendingCall>> {
        lock(&self.calls).drain().map(|(_, call)| call).collect()
    }

    /// Routes one inbound frame to its call
    fn dispatch(&self, args: &[Value]) {
        let Some(raw) = args.first() else {
            return;
        };
        let Ok(Frame::Response(response)) = Frame::parse(raw) else {
            return;
        };
        if let Some(call) = self.get(&response.uid) {
            call.receive(
                response.data,
                response.error,
                response.complete == Some(true),
            );
        }
    }
}

/// Correlation tables of a service, keyed by listener then topic
#[derive(Default)]
pub(crate) struct CallTables {
    listeners: Mutex<HashMap<ListenerId, HashMap<String, Arc<ChannelCalls>>>>,
}

impl CallTables {
    /// Returns the calls of a pair, installing its handler on first use
    pub(crate) fn ensure(
        &self,
        listener: &Arc<dyn Listener>,
        topic: &str,
    ) -> Result<Arc<ChannelCalls>, TransportError> {
        let id = listener.id();
        if let Some(calls) = self.lookup(id, topic) {
            return Ok(calls);
        }

        let calls = Arc::new(ChannelCalls::new());
        let target = Arc::downgrade(&calls);
        let handler: InboundHandler = Arc::new(move |args: &[Value]| {
            if let Some(calls) = target.upgrade() {
                calls.dispatch(args);
            }
        });
        let handler_id = listener.on(topic, handler)?;
        *lock(&calls.handler) = Some(handler_id);

        let mut listeners = lock(&self.listeners);
        let topics = listeners.entry(id).or_default();
        if let Some(existing) = topics.get(topic).cloned() {
            // Another call won the race to install the handler
            drop(listeners);
            listener.off(topic, handler_id);
            return Ok(existing);
        }
        topics.insert(topic.to_string(), calls.clone());
        Ok(calls)
    }

    pub(crate) fn lookup(&self, listener: ListenerId, topic: &str) -> Option<Arc<ChannelCalls>> {
        lock(&self.listeners)
            .get(&listener)
            .and_then(|topics| topics.get(topic))
            .cloned()
    }

    /// Number of calls waiting on a pair
    pub(crate) fn pending(&self, listener: ListenerId, topic: &str) -> usize {
        self.lookup(listener, topic)
            .map(|calls| calls.len())
            .unwrap_or(0)
    }

    /// Detaches every handler of `listener` and fails its pending calls
    ///
    /// Returns how many calls were failed.
    pub(crate) fn release(&self, listener: &dyn Listener) -> usize {
        let Some(topics) = lock(&self.listeners).remove(&listener.id()) else {
            return 0;
        };

        let mut released = 0;
        for (topic, calls) in topics {
            if let Some(handler) = lock(&calls.handler).take() {
                listener.off(&topic, handler);
            }
            for call in calls.drain() {
                if call.release() {
                    released += 1;
                }
            }
        }
        released
    }
}
