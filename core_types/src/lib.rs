//! # Core Types
//!
//! Identifier types shared by every crate of the remote action protocol.
//!
//! ## Key Types
//!
//! - [`CallId`]: correlation id tying one request to its responses
//! - [`ListenerId`]: identity of a transport listener, used to key the
//!   caller's correlation tables

pub mod ids;

pub use ids::{CallId, ListenerId};
