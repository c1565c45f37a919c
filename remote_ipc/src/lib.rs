//! Remote action invocation over a topic-based transport.
//!
//! A [`Service`] lets actions registered on one side of a transport be
//! called from the other side as if they were local, producing a stream of
//! zero or more values that ends in exactly one completion or error.
//!
//! ## Architecture
//!
//! ```text
//!  caller side                                   responder side
//!  ───────────                                   ──────────────
//!  RemoteAction::invoke()                        Service::register()
//!     │ CallStream::subscribe()                     │ one listener on the channel
//!     ▼                                             ▼
//!  PendingCall ── request {uid,name,data} ──────▶ ActionTable[name](data)
//!     ▲                                             │ ActionStream
//!     │ shared listener per (listener, topic)       ▼
//!  CallTables ◀── response {uid,data|error|complete} ─ StreamSink
//! ```
//!
//! ## Invariants
//!
//! - Every call gets a fresh `uid`; it is the only correlation key
//! - A call observes zero or more values, then at most one terminal event
//! - Correlation entries are inserted once and removed once, whichever of
//!   completion, error, timeout, finish signal or disposal gets there first
//! - One failing call never disturbs the shared listener or other calls
//!
//! ## Limitations
//!
//! There is no backpressure. A responder emits values as fast as its
//! action produces them, and a slow consumer buffers whatever the transport
//! and notification wrapper queue up.

pub mod caller;
pub mod config;
mod correlation;
pub mod error;
pub mod finish;
pub mod observer;
pub mod options;
pub mod responder;
pub mod scheduler;
pub mod service;
pub mod stream;

mod sync;
#[cfg(test)]
mod testing;

pub use caller::{CallStream, CallSubscription, Caller, RemoteAction};
pub use config::{ConfigError, ServiceConfig, DEFAULT_CALL_TIMEOUT};
pub use error::CallError;
pub use finish::{FinishOutcome, FinishSignal, FinishTrigger};
pub use observer::{CallEvent, CallObserver, FnObserver};
pub use options::{CallOptions, Notification, NotificationWrapper};
pub use responder::{
    Action, ActionContext, ActionTable, Registration, RegisterOptions, RequestResolver,
    ResolvedRequest, UNKNOWN_ACTION_ERROR,
};
pub use scheduler::{Scheduler, Task, ThreadScheduler, TimerId};
pub use service::{Service, ServiceBuilder};
pub use stream::{no_teardown, ActionStream, StreamObserver, StreamSink, StreamSubscription, Teardown};

pub use ipc::{Payload, RemoteError, Serialization};
