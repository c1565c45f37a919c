//! # Responder
//!
//! Serves an [`ActionTable`] on one channel. Each request runs its action,
//! subscribes to the resulting [`ActionStream`] and relays every value,
//! error and completion back as response frames carrying the request's
//! `uid`. Running subscriptions are tracked per `uid` so a caller can stop
//! them with an unsubscribe frame.

use crate::scheduler::Scheduler;
use crate::stream::{ActionStream, StreamObserver, StreamSubscription};
use crate::sync::lock;
use core_types::CallId;
use ipc::{
    CodecError, Emitter, Emitters, Frame, HandlerId, InboundHandler, Listener, Payload,
    RemoteError, RequestFrame, ResponseFrame, TransportError, ValueCodec,
};
use serde_json::Value;
use services_logger::{LogEntry, LogLevel, SharedLogger};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Error name sent back for requests naming an unregistered action
pub const UNKNOWN_ACTION_ERROR: &str = "UnknownActionError";

/// Action implementation: optional input in, result stream out
pub type Action = Arc<dyn Fn(Option<Payload>, &ActionContext) -> ActionStream + Send + Sync>;

/// Actions served by a registration, by name
#[derive(Clone, Default)]
pub struct ActionTable {
    actions: HashMap<String, Action>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an action, builder style
    pub fn with<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(Option<Payload>, &ActionContext) -> ActionStream + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(action));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    /// Action names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// What an action knows about the request it serves
#[derive(Debug, Clone)]
pub struct ActionContext {
    uid: CallId,
    name: String,
    channel: String,
    args: Vec<Value>,
}

impl ActionContext {
    pub fn uid(&self) -> &CallId {
        &self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Raw listener arguments the request arrived with
    pub fn args(&self) -> &[Value] {
        &self.args
    }
}

/// Frame and reply path picked out of raw listener arguments
pub struct ResolvedRequest {
    pub payload: Value,
    pub emitter: Arc<dyn Emitter>,
}

impl ResolvedRequest {
    pub fn new(payload: Value, emitter: Arc<dyn Emitter>) -> Self {
        Self { payload, emitter }
    }
}

impl fmt::Debug for ResolvedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedRequest")
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// Maps raw listener arguments to a frame and the emitter to answer on
///
/// Returning `None` drops the arguments. Multiplexing transports use it
/// to answer each peer on its own connection.
pub type RequestResolver = Arc<dyn Fn(&[Value]) -> Option<ResolvedRequest> + Send + Sync>;

/// Options of a registration
#[derive(Clone, Default)]
pub struct RegisterOptions {
    pub request_resolver: Option<RequestResolver>,
    /// Overrides the service logger for this registration
    pub logger: Option<SharedLogger>,
}

impl RegisterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_resolver<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&[Value]) -> Option<ResolvedRequest> + Send + Sync + 'static,
    {
        self.request_resolver = Some(Arc::new(resolve));
        self
    }

    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = Some(logger);
        self
    }
}

impl fmt::Debug for RegisterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterOptions")
            .field("request_resolver", &self.request_resolver.is_some())
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

struct LiveSlot {
    token: u64,
    subscription: Arc<StreamSubscription>,
}

struct Responder {
    channel: String,
    actions: ActionTable,
    emitter: Arc<dyn Emitter>,
    resolver: Option<RequestResolver>,
    logger: SharedLogger,
    scheduler: Arc<dyn Scheduler>,
    active: AtomicBool,
    next_token: AtomicU64,
    live: Mutex<HashMap<CallId, LiveSlot>>,
}

impl Responder {
    fn handle(self: &Arc<Self>, args: &[Value]) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        let (raw, emitter) = match &self.resolver {
            Some(resolve) => match resolve(args) {
                Some(resolved) => (resolved.payload, resolved.emitter),
                None => return,
            },
            None => match args.first() {
                Some(raw) => (raw.clone(), self.emitter.clone()),
                None => return,
            },
        };

        match Frame::parse(&raw) {
            Ok(Frame::Request(request)) => self.start(request, args, emitter),
            Ok(Frame::Unsubscribe(frame)) => self.unsubscribe(&frame.uid),
            Ok(Frame::Response(_)) | Err(_) => {}
        }
    }

    fn start(self: &Arc<Self>, request: RequestFrame, args: &[Value], emitter: Arc<dyn Emitter>) {
        let reply = Arc::new(Reply {
            uid: request.uid.clone(),
            name: request.name.clone(),
            channel: self.channel.clone(),
            codec: ValueCodec::for_mode(request.serialization),
            emitter,
            logger: self.logger.clone(),
        });

        if lock(&self.live).contains_key(&request.uid) {
            self.logger
                .log(reply.entry(LogLevel::Info, "provider.duplicate_request"));
            return;
        }

        let Some(action) = self.actions.get(&request.name).cloned() else {
            let error = RemoteError::new(
                UNKNOWN_ACTION_ERROR,
                format!(
                    "Action \"{}\" is not registered on \"{}\" channel",
                    request.name, self.channel
                ),
            )
            .with_field("action", request.name.clone());
            reply.error(&error);
            return;
        };

        let input = match request.data.map(|data| reply.codec.decode(data)).transpose() {
            Ok(input) => input,
            Err(error) => {
                reply.error(&RemoteError::from_error(&error));
                return;
            }
        };

        let context = ActionContext {
            uid: request.uid.clone(),
            name: request.name,
            channel: self.channel.clone(),
            args: args.to_vec(),
        };
        let stream = action(input, &context);

        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let subscription = StreamSubscription::new(Arc::new(ReplyObserver {
            reply: reply.clone(),
            responder: Arc::downgrade(self),
            token,
        }));

        // The slot must exist before the producer can push or be cancelled
        let live = {
            let mut live = lock(&self.live);
            live.insert(
                request.uid.clone(),
                LiveSlot {
                    token,
                    subscription: subscription.clone(),
                },
            );
            live.len()
        };
        self.logger.log(
            reply
                .entry(LogLevel::Info, "subscription added")
                .with_field("live", live),
        );

        if !self.active.load(Ordering::SeqCst) {
            self.remove(&request.uid, Some(token));
            return;
        }
        stream.attach(&subscription);
    }

    fn unsubscribe(&self, uid: &CallId) {
        if self.remove(uid, None) {
            self.logger.log(
                LogEntry::new(LogLevel::Info, "provider.unsubscribe")
                    .with_field("channel", &self.channel)
                    .with_field("type", "unsubscribe")
                    .with_field("uid", uid),
            );
        }
    }

    /// Removes and cancels a live subscription
    ///
    /// With a token, only the slot that token was issued for is removed.
    fn remove(&self, uid: &CallId, token: Option<u64>) -> bool {
        let (slot, live) = {
            let mut live = lock(&self.live);
            match live.get(uid) {
                Some(slot) if token.map_or(true, |token| token == slot.token) => {}
                _ => return false,
            }
            (live.remove(uid), live.len())
        };
        let Some(slot) = slot else {
            return false;
        };

        slot.subscription.cancel();
        self.logger.log(
            LogEntry::new(LogLevel::Info, "subscription removed")
                .with_field("channel", &self.channel)
                .with_field("uid", uid)
                .with_field("live", live),
        );
        true
    }

    /// Removes the slot at the next scheduling opportunity
    fn remove_later(self: &Arc<Self>, uid: CallId, token: u64) {
        let responder = Arc::downgrade(self);
        self.scheduler.defer(Box::new(move || {
            if let Some(responder) = responder.upgrade() {
                responder.remove(&uid, Some(token));
            }
        }));
    }

    fn cancel_all(&self) -> usize {
        let slots: Vec<LiveSlot> = lock(&self.live).drain().map(|(_, slot)| slot).collect();
        for slot in &slots {
            slot.subscription.cancel();
        }
        slots.len()
    }
}

/// Writes response frames for one request
struct Reply {
    uid: CallId,
    name: String,
    channel: String,
    codec: ValueCodec,
    emitter: Arc<dyn Emitter>,
    logger: SharedLogger,
}

impl Reply {
    fn data(&self, value: &Payload) -> Result<(), CodecError> {
        let data = self.codec.encode(value)?;
        self.send(
            ResponseFrame::data(self.uid.clone(), self.name.clone(), data),
            self.entry(LogLevel::Info, "provider.emit"),
        );
        Ok(())
    }

    fn error(&self, error: &RemoteError) {
        self.send(
            ResponseFrame::error(self.uid.clone(), self.name.clone(), error),
            self.entry(LogLevel::Error, "provider.error")
                .with_field("error", error.name()),
        );
    }

    fn complete(&self) {
        self.send(
            ResponseFrame::complete(self.uid.clone(), self.name.clone()),
            self.entry(LogLevel::Info, "provider.complete"),
        );
    }

    fn send(&self, frame: ResponseFrame, entry: LogEntry) {
        let sent = Frame::Response(frame)
            .to_value()
            .map_err(|error| TransportError::Rejected(error.to_string()))
            .and_then(|value| self.emitter.emit(&self.channel, value));
        match sent {
            Ok(()) => self.logger.log(entry),
            Err(error) => self.logger.log(
                self.entry(LogLevel::Error, "provider.emit_failed")
                    .with_field("error", &error),
            ),
        }
    }

    fn entry(&self, level: LogLevel, message: &str) -> LogEntry {
        LogEntry::new(level, message)
            .with_field("channel", &self.channel)
            .with_field("name", &self.name)
            .with_field("type", "response")
            .with_field("uid", &self.uid)
    }
}

/// Relays a running action's stream as response frames
struct ReplyObserver {
    reply: Arc<Reply>,
    responder: Weak<Responder>,
    token: u64,
}

impl StreamObserver for ReplyObserver {
    fn next(&self, value: Payload) {
        if let Err(error) = self.reply.data(&value) {
            self.reply.error(&RemoteError::from_error(&error));
            if let Some(responder) = self.responder.upgrade() {
                responder.remove(&self.reply.uid, Some(self.token));
            }
        }
    }

    fn error(&self, error: RemoteError) {
        self.reply.error(&error);
        if let Some(responder) = self.responder.upgrade() {
            responder.remove_later(self.reply.uid.clone(), self.token);
        }
    }

    fn complete(&self) {
        self.reply.complete();
        if let Some(responder) = self.responder.upgrade() {
            responder.remove_later(self.reply.uid.clone(), self.token);
        }
    }
}

/// Live registration of an action table on a channel
///
/// Dropping the registration keeps the actions served; call
/// [`unregister`](Registration::unregister) to stop.
pub struct Registration {
    responder: Arc<Responder>,
    listener: Arc<dyn Listener>,
    handler: Mutex<Option<HandlerId>>,
}

impl Registration {
    pub(crate) fn open(
        channel: &str,
        actions: ActionTable,
        emitters: Emitters,
        resolver: Option<RequestResolver>,
        logger: SharedLogger,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, TransportError> {
        let responder = Arc::new(Responder {
            channel: channel.to_string(),
            actions,
            emitter: emitters.emitter,
            resolver,
            logger,
            scheduler,
            active: AtomicBool::new(true),
            next_token: AtomicU64::new(1),
            live: Mutex::new(HashMap::new()),
        });

        let target = responder.clone();
        let handler: InboundHandler = Arc::new(move |args: &[Value]| target.handle(args));
        let handler_id = emitters.listener.on(channel, handler)?;

        responder.logger.log(
            LogEntry::new(LogLevel::Info, "registered")
                .with_field("channel", channel)
                .with_field("actions", responder.actions.names().join(",")),
        );

        Ok(Self {
            responder,
            listener: emitters.listener,
            handler: Mutex::new(Some(handler_id)),
        })
    }

    /// Stops serving: detaches the listener and cancels running actions
    ///
    /// Returns false if the registration was already stopped.
    pub fn unregister(&self) -> bool {
        let Some(handler) = lock(&self.handler).take() else {
            return false;
        };
        self.responder.active.store(false, Ordering::SeqCst);
        self.listener.off(&self.responder.channel, handler);
        let cancelled = self.responder.cancel_all();

        self.responder.logger.log(
            LogEntry::new(LogLevel::Info, "unregister called")
                .with_field("channel", &self.responder.channel)
                .with_field("cancelled", cancelled),
        );
        true
    }

    pub fn is_registered(&self) -> bool {
        lock(&self.handler).is_some()
    }

    /// Number of actions still streaming
    pub fn live_subscriptions(&self) -> usize {
        lock(&self.responder.live).len()
    }

    pub fn channel(&self) -> &str {
        &self.responder.channel
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("channel", &self.responder.channel)
            .field("actions", &self.responder.actions)
            .field("registered", &self.is_registered())
            .field("live", &self.live_subscriptions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::no_teardown;
    use crate::testing::{LoopTransport, ManualScheduler};
    use serde_json::json;
    use services_logger::{MemoryLogger, SilentLogger};
    use std::sync::atomic::AtomicUsize;

    struct Fixture {
        transport: Arc<LoopTransport>,
        scheduler: Arc<ManualScheduler>,
        logger: Arc<MemoryLogger>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                transport: LoopTransport::new(),
                scheduler: Arc::new(ManualScheduler::default()),
                logger: Arc::new(MemoryLogger::new()),
            }
        }

        fn register(&self, actions: ActionTable) -> Registration {
            Registration::open(
                "rpc",
                actions,
                Emitters::from_transport(self.transport.clone()),
                None,
                self.logger.clone(),
                self.scheduler.clone(),
            )
            .unwrap()
        }

        fn request(&self, uid: &str, name: &str, data: Option<Value>) {
            let mut frame = json!({"type": "request", "uid": uid, "name": name});
            if let Some(data) = data {
                frame["data"] = data;
            }
            self.transport.deliver("rpc", frame);
        }

        fn responses(&self) -> Vec<Value> {
            self.transport
                .sent()
                .into_iter()
                .filter(|frame| frame["type"] == "response")
                .collect()
        }
    }

    fn echo_table() -> ActionTable {
        ActionTable::new().with("echo", |input, _ctx| match input {
            Some(value) => ActionStream::once(value),
            None => ActionStream::empty(),
        })
    }

    #[test]
    fn test_value_then_complete() {
        let fixture = Fixture::new();
        let registration = fixture.register(echo_table());

        fixture.request("u1", "echo", Some(json!({"a": 1})));

        let responses = fixture.responses();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["data"], json!({"a": 1}));
        assert_eq!(responses[0]["uid"], json!("u1"));
        assert_eq!(responses[1]["complete"], json!(true));

        assert_eq!(registration.live_subscriptions(), 1);
        fixture.scheduler.run_deferred();
        assert_eq!(registration.live_subscriptions(), 0);
    }

    #[test]
    fn test_null_input_is_passed_as_value() {
        let fixture = Fixture::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        fixture.register(ActionTable::new().with("probe", move |input, _ctx| {
            sink.lock().unwrap().push(input);
            ActionStream::empty()
        }));

        fixture.request("u1", "probe", None);
        fixture.request("u2", "probe", Some(Value::Null));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![None, Some(Payload::Json(Value::Null))]
        );
    }

    #[test]
    fn test_unknown_action_replies_with_error() {
        let fixture = Fixture::new();
        let registration = fixture.register(echo_table());

        fixture.request("u1", "missing", None);

        let responses = fixture.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["error"]["name"], json!(UNKNOWN_ACTION_ERROR));
        assert_eq!(responses[0]["error"]["action"], json!("missing"));
        assert_eq!(registration.live_subscriptions(), 0);
        assert_eq!(fixture.logger.count(LogLevel::Error), 1);
    }

    #[test]
    fn test_unsubscribe_cancels_running_action() {
        let fixture = Fixture::new();
        let torn = Arc::new(AtomicUsize::new(0));
        let counter = torn.clone();
        let registration = fixture.register(ActionTable::new().with("ticks", move |_, _| {
            let counter = counter.clone();
            ActionStream::new(move |sink| {
                sink.next(json!(1));
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
        }));

        fixture.request("u1", "ticks", None);
        assert_eq!(registration.live_subscriptions(), 1);

        fixture
            .transport
            .deliver("rpc", json!({"type": "unsubscribe", "uid": "u1"}));
        fixture
            .transport
            .deliver("rpc", json!({"type": "unsubscribe", "uid": "u1"}));

        assert_eq!(registration.live_subscriptions(), 0);
        assert_eq!(torn.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.logger.with_message("provider.unsubscribe").len(), 1);
    }

    #[test]
    fn test_unsubscribe_during_synchronous_subscribe() {
        let fixture = Fixture::new();
        let torn = Arc::new(AtomicUsize::new(0));
        let counter = torn.clone();
        let transport = fixture.transport.clone();
        let registration = fixture.register(ActionTable::new().with("self_cancel", move |_, ctx| {
            let counter = counter.clone();
            let transport = transport.clone();
            let uid = ctx.uid().clone();
            ActionStream::new(move |sink| {
                sink.next(json!("before"));
                transport.deliver("rpc", json!({"type": "unsubscribe", "uid": uid.as_str()}));
                sink.next(json!("after"));
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
        }));

        fixture.request("u1", "self_cancel", None);

        let responses = fixture.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["data"], json!("before"));
        assert_eq!(torn.load(Ordering::SeqCst), 1);
        assert_eq!(registration.live_subscriptions(), 0);
    }

    #[test]
    fn test_late_deferred_removal_keeps_newer_slot() {
        let fixture = Fixture::new();
        let registration = fixture.register(
            echo_table().with("hold", |_, _| ActionStream::new(|_sink| no_teardown())),
        );

        fixture.request("u1", "echo", Some(json!(1)));
        // The first slot is still waiting for its deferred removal
        fixture
            .transport
            .deliver("rpc", json!({"type": "unsubscribe", "uid": "u1"}));
        fixture.request("u1", "hold", None);
        assert_eq!(registration.live_subscriptions(), 1);

        fixture.scheduler.run_deferred();
        assert_eq!(registration.live_subscriptions(), 1);
    }

    #[test]
    fn test_duplicate_request_is_ignored_while_live() {
        let fixture = Fixture::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        fixture.register(ActionTable::new().with("hold", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            ActionStream::never()
        }));

        fixture.request("u1", "hold", None);
        fixture.request("u1", "hold", None);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_action_error_is_relayed() {
        let fixture = Fixture::new();
        fixture.register(ActionTable::new().with("fail", |_, _| {
            ActionStream::fail(RemoteError::new("QuotaError", "slow down").with_field("limit", 3))
        }));

        fixture.request("u1", "fail", None);

        let responses = fixture.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(
            responses[0]["error"],
            json!({"name": "QuotaError", "message": "slow down", "limit": 3})
        );
    }

    #[test]
    fn test_bad_reference_safe_input_is_codec_error() {
        let fixture = Fixture::new();
        fixture.register(echo_table());

        fixture.transport.deliver(
            "rpc",
            json!({"type": "request", "uid": "u1", "name": "echo", "data": 5, "serialization": "reference-safe"}),
        );

        let responses = fixture.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["error"]["name"], json!("CodecError"));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let fixture = Fixture::new();
        let torn = Arc::new(AtomicUsize::new(0));
        let counter = torn.clone();
        let registration = fixture.register(ActionTable::new().with("hold", move |_, _| {
            let counter = counter.clone();
            ActionStream::new(move |_sink| {
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
        }));

        fixture.request("u1", "hold", None);
        fixture.request("u2", "hold", None);

        assert!(registration.unregister());
        assert!(!registration.unregister());
        assert!(!registration.is_registered());
        assert_eq!(torn.load(Ordering::SeqCst), 2);
        assert_eq!(fixture.transport.handler_count("rpc"), 0);
        assert_eq!(fixture.logger.with_message("unregister called").len(), 1);
    }

    #[test]
    fn test_resolver_picks_frame_and_emitter() {
        let fixture = Fixture::new();
        let reply_path = LoopTransport::new();
        let reply_emitter: Arc<dyn Emitter> = reply_path.clone();
        let resolver: RequestResolver = Arc::new(move |args: &[Value]| {
            args.get(1)
                .cloned()
                .map(|frame| ResolvedRequest::new(frame, reply_emitter.clone()))
        });
        let _registration = Registration::open(
            "rpc",
            echo_table(),
            Emitters::from_transport(fixture.transport.clone()),
            Some(resolver),
            Arc::new(SilentLogger),
            fixture.scheduler.clone(),
        )
        .unwrap();

        let frame = json!({"type": "request", "uid": "u1", "name": "echo", "data": "x"});
        fixture.transport.deliver("rpc", frame.clone());
        assert!(reply_path.sent().is_empty());

        // Multiplexed delivery: connection id first, frame second
        let args = [json!("conn-7"), frame];
        fixture.transport.deliver_args("rpc", &args);

        assert_eq!(reply_path.sent_types(), vec!["response", "response"]);
        assert!(fixture.responses().is_empty());
    }
}
