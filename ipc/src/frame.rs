//! Wire frames and their envelope fields
//!
//! Every frame is a JSON object discriminated by its `type` field. The
//! `uid` is the only correlation key between a request, its responses and
//! a later forced unsubscribe.

use crate::codec::Serialization;
use crate::error_codec::RemoteError;
use core_types::CallId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while reading or writing frames
#[derive(Debug, Error)]
pub enum FrameError {
    /// The value is not a request, unsubscribe or response frame
    #[error("Malformed frame: {0}")]
    Malformed(serde_json::Error),

    /// The frame could not be turned into a JSON value
    #[error("Frame encoding failed: {0}")]
    Encode(serde_json::Error),
}

/// Any frame exchanged on a protocol topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Caller asks for an action to run
    Request(RequestFrame),
    /// Caller asks the responder to stop a running action
    Unsubscribe(UnsubscribeFrame),
    /// Responder reports a value or the end of a call
    Response(ResponseFrame),
}

impl Frame {
    /// Reads a frame out of a raw listener argument
    pub fn parse(value: &Value) -> Result<Self, FrameError> {
        Frame::deserialize(value).map_err(FrameError::Malformed)
    }

    /// Writes this frame as a JSON value ready for `emit`
    pub fn to_value(&self) -> Result<Value, FrameError> {
        serde_json::to_value(self).map_err(FrameError::Encode)
    }

    /// Correlation id of this frame
    pub fn uid(&self) -> &CallId {
        match self {
            Frame::Request(frame) => &frame.uid,
            Frame::Unsubscribe(frame) => &frame.uid,
            Frame::Response(frame) => &frame.uid,
        }
    }

    /// Returns the wire name of the frame type
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Request(_) => "request",
            Frame::Unsubscribe(_) => "unsubscribe",
            Frame::Response(_) => "response",
        }
    }
}

/// Request frame (caller → responder)
///
/// `data` is present exactly when the caller passed an argument. An
/// explicit `"data": null` is an argument whose value is null and is kept
/// as `Some(Value::Null)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub uid: CallId,
    pub name: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
    #[serde(
        default,
        deserialize_with = "lenient_serialization",
        skip_serializing_if = "Option::is_none"
    )]
    pub serialization: Option<Serialization>,
}

impl RequestFrame {
    /// Creates a request without input
    pub fn new(uid: CallId, name: impl Into<String>) -> Self {
        Self {
            uid,
            name: name.into(),
            data: None,
            serialization: None,
        }
    }

    /// Attaches the (already encoded) input value
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Requests a value codec for both legs of the call
    pub fn with_serialization(mut self, serialization: Option<Serialization>) -> Self {
        self.serialization = serialization;
        self
    }
}

/// Forced unsubscribe (caller → responder)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeFrame {
    pub uid: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl UnsubscribeFrame {
    /// Creates an unsubscribe signal for a call
    pub fn new(uid: CallId) -> Self {
        Self { uid, name: None }
    }
}

/// Response frame (responder → caller)
///
/// A call's responses are zero or more `data` frames followed by exactly
/// one frame carrying either `error` or `complete: true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub uid: CallId,
    #[serde(default)]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
}

impl ResponseFrame {
    fn empty(uid: CallId, name: impl Into<String>) -> Self {
        Self {
            uid,
            name: name.into(),
            data: None,
            error: None,
            complete: None,
        }
    }

    /// Creates a value-bearing response
    pub fn data(uid: CallId, name: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::empty(uid, name)
        }
    }

    /// Creates a terminal error response
    pub fn error(uid: CallId, name: impl Into<String>, error: &RemoteError) -> Self {
        Self {
            error: Some(error.to_wire()),
            ..Self::empty(uid, name)
        }
    }

    /// Creates a terminal success response
    pub fn complete(uid: CallId, name: impl Into<String>) -> Self {
        Self {
            complete: Some(true),
            ..Self::empty(uid, name)
        }
    }

    /// Checks if this frame ends its call
    pub fn is_terminal(&self) -> bool {
        self.error.is_some() || self.complete == Some(true)
    }
}

/// Maps a present key to `Some`, even when its value is `null`
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Unknown codec tags fall back to transparent values
fn lenient_serialization<'de, D>(deserializer: D) -> Result<Option<Serialization>, D::Error>
where
    D: Deserializer<'de>,
{
    let tag = Value::deserialize(deserializer)?;
    Ok(tag.as_str().and_then(Serialization::from_tag))
}
