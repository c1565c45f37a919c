//! # Simulated Message Bus
//!
//! Deterministic in-memory stand-ins for the pieces a remote action
//! service talks to: a pub/sub transport, a clock and an observer.
//!
//! ## Philosophy
//!
//! **Determinism enables thorough testing.**
//!
//! Nothing here advances on its own. Frames move when the bus delivers
//! them (immediately, or when pumped) and time moves when a test advances
//! the clock. A failing scenario replays exactly the same way every run.
//!
//! ## Pieces
//!
//! - [`SimBus`]: pub/sub hub; each [`BusEndpoint`] is one peer with its
//!   own listener identity
//! - [`FaultPlan`]: drops and duplicates frames on the way through
//! - [`SimScheduler`]: virtual clock implementing the service scheduler
//! - [`RecordingObserver`]: keeps every event of a call

pub mod bus;
pub mod fault_injection;
pub mod observer;
pub mod scheduler;

pub use bus::{BusEndpoint, DeliveryMode, SimBus};
pub use fault_injection::{FaultInjector, FaultPlan, FrameFault};
pub use observer::RecordingObserver;
pub use scheduler::SimScheduler;
