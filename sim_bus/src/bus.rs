//! # Simulated pub/sub bus
//!
//! Every [`BusEndpoint`] is one peer: it has its own listener identity and
//! sees every frame published on the topics it listens to, including its
//! own. Every emitted frame is recorded before faults are applied, so tests
//! can assert on what a peer tried to send.

use crate::fault_injection::{FaultInjector, FaultPlan};
use core_types::ListenerId;
use ipc::{Emitter, HandlerId, InboundHandler, Listener, TransportError};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// When emitted frames reach their handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Inside `emit`, before it returns
    #[default]
    Immediate,
    /// When the test pumps the bus
    Queued,
}

struct Subscription {
    topic: String,
    id: HandlerId,
    handler: InboundHandler,
}

struct BusState {
    next_handler: u64,
    subscriptions: Vec<Subscription>,
    queue: VecDeque<(String, Vec<Value>)>,
    sent: Vec<(String, Value)>,
    injector: FaultInjector,
    dropped: usize,
    closed: bool,
}

struct BusInner {
    mode: DeliveryMode,
    state: Mutex<BusState>,
}

impl BusInner {
    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers(&self, topic: &str) -> Vec<InboundHandler> {
        self.state()
            .subscriptions
            .iter()
            .filter(|subscription| subscription.topic == topic)
            .map(|subscription| subscription.handler.clone())
            .collect()
    }

    /// Runs handlers with no lock held; they may emit again
    fn deliver(&self, topic: &str, args: &[Value]) {
        for handler in self.handlers(topic) {
            handler(args);
        }
    }

    fn publish(&self, topic: &str, frame: Value) -> Result<(), TransportError> {
        let copies = {
            let mut state = self.state();
            if state.closed {
                return Err(TransportError::Closed);
            }
            state.sent.push((topic.to_string(), frame.clone()));
            let copies = state.injector.copies(topic, &frame);
            if copies == 0 {
                state.dropped += 1;
            }
            if self.mode == DeliveryMode::Queued {
                for _ in 0..copies {
                    state
                        .queue
                        .push_back((topic.to_string(), vec![frame.clone()]));
                }
                return Ok(());
            }
            copies
        };

        for _ in 0..copies {
            self.deliver(topic, &[frame.clone()]);
        }
        Ok(())
    }
}

/// In-memory pub/sub hub
#[derive(Clone)]
pub struct SimBus {
    inner: Arc<BusInner>,
}

impl SimBus {
    pub fn new(mode: DeliveryMode) -> Self {
        Self::with_fault_plan(mode, FaultPlan::new())
    }

    pub fn with_fault_plan(mode: DeliveryMode, plan: FaultPlan) -> Self {
        Self {
            inner: Arc::new(BusInner {
                mode,
                state: Mutex::new(BusState {
                    next_handler: 1,
                    subscriptions: Vec::new(),
                    queue: VecDeque::new(),
                    sent: Vec::new(),
                    injector: FaultInjector::new(plan),
                    dropped: 0,
                    closed: false,
                }),
            }),
        }
    }

    /// Creates a new peer on this bus
    pub fn endpoint(&self) -> Arc<BusEndpoint> {
        Arc::new(BusEndpoint {
            id: ListenerId::new(),
            bus: self.inner.clone(),
        })
    }

    pub fn mode(&self) -> DeliveryMode {
        self.inner.mode
    }

    /// Delivers the oldest queued frame; false when the queue is empty
    pub fn pump(&self) -> bool {
        let next = self.inner.state().queue.pop_front();
        match next {
            Some((topic, args)) => {
                self.inner.deliver(&topic, &args);
                true
            }
            None => false,
        }
    }

    /// Pumps until nothing is queued, including frames emitted while
    /// pumping; returns how many deliveries ran
    pub fn run_until_idle(&self) -> usize {
        let mut delivered = 0;
        while self.pump() {
            delivered += 1;
        }
        delivered
    }

    /// Delivers raw listener arguments to a topic, bypassing faults and
    /// recording
    pub fn inject(&self, topic: &str, args: Vec<Value>) {
        match self.inner.mode {
            DeliveryMode::Immediate => self.inner.deliver(topic, &args),
            DeliveryMode::Queued => self
                .inner
                .state()
                .queue
                .push_back((topic.to_string(), args)),
        }
    }

    /// Frames emitted on `topic`, in order, including dropped ones
    pub fn sent(&self, topic: &str) -> Vec<Value> {
        self.inner
            .state()
            .sent
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// Frames of one `type` emitted on `topic`
    pub fn sent_of_type(&self, topic: &str, frame_type: &str) -> Vec<Value> {
        self.sent(topic)
            .into_iter()
            .filter(|frame| frame["type"] == frame_type)
            .collect()
    }

    pub fn queued(&self) -> usize {
        self.inner.state().queue.len()
    }

    /// Frames the fault plan swallowed
    pub fn dropped(&self) -> usize {
        self.inner.state().dropped
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        self.inner
            .state()
            .subscriptions
            .iter()
            .filter(|subscription| subscription.topic == topic)
            .count()
    }

    /// Refuses every later emit and attach; queued frames are discarded
    pub fn close(&self) {
        let mut state = self.inner.state();
        state.closed = true;
        state.queue.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state().closed
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new(DeliveryMode::default())
    }
}

impl fmt::Debug for SimBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("SimBus")
            .field("mode", &self.inner.mode)
            .field("subscriptions", &state.subscriptions.len())
            .field("queued", &state.queue.len())
            .field("sent", &state.sent.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// One peer on a [`SimBus`]
pub struct BusEndpoint {
    id: ListenerId,
    bus: Arc<BusInner>,
}

impl Emitter for BusEndpoint {
    fn emit(&self, topic: &str, frame: Value) -> Result<(), TransportError> {
        self.bus.publish(topic, frame)
    }
}

impl Listener for BusEndpoint {
    fn id(&self) -> ListenerId {
        self.id
    }

    fn on(&self, topic: &str, handler: InboundHandler) -> Result<HandlerId, TransportError> {
        let mut state = self.bus.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        let id = HandlerId::new(state.next_handler);
        state.next_handler += 1;
        state.subscriptions.push(Subscription {
            topic: topic.to_string(),
            id,
            handler,
        });
        Ok(id)
    }

    fn off(&self, topic: &str, handler: HandlerId) {
        self.bus
            .state()
            .subscriptions
            .retain(|subscription| !(subscription.topic == topic && subscription.id == handler));
    }
}

impl fmt::Debug for BusEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusEndpoint").field("id", &self.id).finish()
    }
}
