//! Resilience Test Utilities
//!
//! Shared setup for the end-to-end tests of the remote action service.
//!
//! ## Test Philosophy
//!
//! - **One terminal per call**: whatever races, a call ends exactly once
//! - **Deterministic failures**: lost, duplicated and late frames come from
//!   a `FaultPlan`, time comes from a virtual clock
//! - **No leaks**: correlation entries and live subscriptions are gone once
//!   a call has ended on both sides

use ipc::{Emitters, Listener, Payload, RemoteError, TransportError};
use remote_ipc::{
    ActionStream, ActionTable, Caller, RegisterOptions, Registration, Service,
    ServiceConfig,
};
use serde_json::{json, Value};
use services_logger::MemoryLogger;
use sim_bus::{BusEndpoint, DeliveryMode, FaultPlan, SimBus, SimScheduler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Channel every harness service is configured with
pub const CHANNEL: &str = "rpc";

/// Default call timeout of harness services
pub const CALL_TIMEOUT: Duration = Duration::from_millis(100);

/// Two peers on one simulated bus, each with its own service
pub struct Harness {
    pub bus: SimBus,
    pub scheduler: Arc<SimScheduler>,
    pub logger: Arc<MemoryLogger>,
    /// Service on the responding peer
    pub server: Service,
    /// Service on the calling peer
    pub client: Service,
    pub server_end: Arc<BusEndpoint>,
    pub client_end: Arc<BusEndpoint>,
}

impl Harness {
    /// Serves `actions` from the responding peer
    pub fn serve(&self, actions: ActionTable) -> Result<Registration, TransportError> {
        self.serve_with(actions, RegisterOptions::new())
    }

    pub fn serve_with(
        &self,
        actions: ActionTable,
        options: RegisterOptions,
    ) -> Result<Registration, TransportError> {
        self.server
            .register(actions, self.server_end.clone(), options)
    }

    /// Caller on the calling peer with the service defaults
    pub fn caller(&self) -> Caller {
        self.client
            .caller(Emitters::from_transport(self.client_end.clone()), None)
    }

    /// Calls waiting on the calling peer
    pub fn pending_calls(&self) -> usize {
        self.client.pending_calls(self.client_end.id(), CHANNEL)
    }

    /// Delivers queued frames and runs deferred work until both are idle
    pub fn settle(&self) {
        loop {
            let delivered = self.bus.run_until_idle();
            let ran = self.scheduler.run_due();
            if delivered == 0 && ran == 0 {
                return;
            }
        }
    }
}

/// Bootstrap helper for tests
pub fn test_bootstrap(mode: DeliveryMode) -> Harness {
    bootstrap_with_faults(mode, FaultPlan::new())
}

/// Like [`test_bootstrap`], with faults injected on the bus
pub fn bootstrap_with_faults(mode: DeliveryMode, plan: FaultPlan) -> Harness {
    let bus = SimBus::with_fault_plan(mode, plan);
    let scheduler = Arc::new(SimScheduler::new());
    let logger = Arc::new(MemoryLogger::new());
    let config = ServiceConfig::new(CHANNEL).with_call_timeout(CALL_TIMEOUT);

    let service = |config: ServiceConfig| {
        Service::builder(config)
            .logger(logger.clone())
            .scheduler(scheduler.clone())
            .build()
    };
    let server = service(config.clone());
    let client = service(config);

    Harness {
        server,
        client,
        server_end: bus.endpoint(),
        client_end: bus.endpoint(),
        bus,
        scheduler,
        logger,
    }
}

/// Counts how often a teardown ran
#[derive(Debug, Clone, Default)]
pub struct TeardownCounter(Arc<AtomicUsize>);

impl TeardownCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn teardown(&self) -> remote_ipc::Teardown {
        let counter = self.0.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }
}

/// Actions used across the tests
///
/// - `greet`: one greeting for the input name
/// - `count`: the numbers 1..=n for input n
/// - `fail`: a `QuotaError` carrying a `limit` field
/// - `hold`: never answers; counts its teardowns in `held`
/// - `mirror`: returns its input unchanged
pub fn demo_actions(held: &TeardownCounter) -> ActionTable {
    let held = held.clone();
    ActionTable::new()
        .with("greet", |input, _| {
            let name = input
                .as_ref()
                .and_then(Payload::as_json)
                .and_then(Value::as_str)
                .unwrap_or("stranger")
                .to_string();
            ActionStream::once(format!("hello, {}", name))
        })
        .with("count", |input, _| {
            let n = input
                .as_ref()
                .and_then(Payload::as_json)
                .and_then(Value::as_u64)
                .unwrap_or(0);
            ActionStream::of((1..=n).map(|i| json!(i)))
        })
        .with("fail", |_, _| {
            ActionStream::fail(
                RemoteError::new("QuotaError", "too many calls").with_field("limit", 3),
            )
        })
        .with("hold", move |_, _| {
            let held = held.clone();
            ActionStream::new(move |_sink| held.teardown())
        })
        .with("mirror", |input, _| match input {
            Some(value) => ActionStream::once(value),
            None => ActionStream::empty(),
        })
}
