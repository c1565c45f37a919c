//! Transport abstraction
//!
//! The engine never owns a transport. It only needs to emit a frame on a
//! topic and to attach and detach inbound handlers. Delivery must be
//! ordered per topic; everything else (retries, at-least-once, ordering
//! across topics) is the transport's business.

use core_types::ListenerId;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Inbound handler attached to a topic
///
/// Receives the raw listener arguments. For plain transports the first
/// argument is the frame; multiplexing transports may pass more.
pub type InboundHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Handle of an attached inbound handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Creates a handler id from a transport-chosen number
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({})", self.0)
    }
}

/// Transport failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport no longer accepts frames or handlers
    #[error("Transport is closed")]
    Closed,

    /// The transport refused the operation
    #[error("Transport rejected the operation: {0}")]
    Rejected(String),
}

/// Outbound half of a transport
pub trait Emitter: Send + Sync {
    /// Publishes a frame on a topic
    fn emit(&self, topic: &str, frame: Value) -> Result<(), TransportError>;
}

/// Inbound half of a transport
pub trait Listener: Send + Sync {
    /// Identity of this listener; clones of one listener share it
    fn id(&self) -> ListenerId;

    /// Attaches a handler to a topic
    fn on(&self, topic: &str, handler: InboundHandler) -> Result<HandlerId, TransportError>;

    /// Detaches a handler; unknown handlers are ignored
    fn off(&self, topic: &str, handler: HandlerId);
}

/// Both halves on one object
pub trait Transport: Emitter + Listener {}

impl<T: Emitter + Listener + ?Sized> Transport for T {}

/// Emitter and listener a call talks through
#[derive(Clone)]
pub struct Emitters {
    pub emitter: Arc<dyn Emitter>,
    pub listener: Arc<dyn Listener>,
}

impl Emitters {
    /// Pairs an emitter with a (possibly different) listener
    pub fn new(emitter: Arc<dyn Emitter>, listener: Arc<dyn Listener>) -> Self {
        Self { emitter, listener }
    }

    /// Uses one transport for both directions
    pub fn from_transport<T: Transport + 'static>(transport: Arc<T>) -> Self {
        Self {
            emitter: transport.clone(),
            listener: transport,
        }
    }
}

impl fmt::Debug for Emitters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitters")
            .field("listener", &self.listener.id())
            .finish_non_exhaustive()
    }
}

/// Lazily resolved emitters
pub type EmittersResolver = Arc<dyn Fn() -> Result<Emitters, TransportError> + Send + Sync>;

/// Where a caller finds its emitters
#[derive(Clone)]
pub enum EmittersSource {
    /// Always the same pair
    Fixed(Emitters),
    /// Resolved each time a call starts
    Resolver(EmittersResolver),
}

impl EmittersSource {
    /// Wraps a resolver closure
    pub fn resolver<F>(resolve: F) -> Self
    where
        F: Fn() -> Result<Emitters, TransportError> + Send + Sync + 'static,
    {
        EmittersSource::Resolver(Arc::new(resolve))
    }

    /// Returns the emitters to use now
    pub fn resolve(&self) -> Result<Emitters, TransportError> {
        match self {
            EmittersSource::Fixed(emitters) => Ok(emitters.clone()),
            EmittersSource::Resolver(resolve) => resolve(),
        }
    }
}

impl From<Emitters> for EmittersSource {
    fn from(emitters: Emitters) -> Self {
        EmittersSource::Fixed(emitters)
    }
}

impl fmt::Debug for EmittersSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmittersSource::Fixed(emitters) => f.debug_tuple("Fixed").field(emitters).finish(),
            EmittersSource::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}
