//! # Remote Action Wire Layer
//!
//! This crate defines what travels between a caller and a responder.
//!
//! ## Philosophy
//!
//! - **Frames, not calls**: A remote invocation is a request frame followed
//!   by zero or more data frames and exactly one terminal frame
//! - **One correlation key**: Every frame carries the `uid` of its call
//! - **Transport-agnostic**: Anything offering `emit`/`on`/`off` on string
//!   topics can carry frames
//! - **Errors travel as data**: Failures are encoded into plain structures
//!   and rebuilt on the other side
//!
//! ## Layout
//!
//! - [`frame`]: request, unsubscribe and response frames
//! - [`graph`]: value graphs with shared and cyclic references
//! - [`codec`]: transparent and reference-safe value codecs
//! - [`error_codec`]: transportable error structure
//! - [`transport`]: emitter/listener traits the engine is written against

pub mod codec;
pub mod error_codec;
pub mod frame;
pub mod graph;
pub mod transport;

pub use codec::{CodecError, Payload, Serialization, ValueCodec};
pub use error_codec::RemoteError;
pub use frame::{Frame, FrameError, RequestFrame, ResponseFrame, UnsubscribeFrame};
pub use graph::{GraphError, Node, NodeId, ValueGraph};
pub use transport::{
    Emitter, Emitters, EmittersSource, HandlerId, InboundHandler, Listener, Transport,
    TransportError,
};
