//! Transportable errors
//!
//! Errors cross the transport as plain objects carrying `name`, `message`,
//! an optional `stack` and any custom fields next to them. The caller side
//! rebuilds a [`RemoteError`] so consumers can match on the name and the
//! fields as if the error had been raised locally.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Name used when a peer sends an error without one
pub const DEFAULT_ERROR_NAME: &str = "Error";

const RESERVED_KEYS: [&str; 3] = ["name", "message", "stack"];

/// Error structure shared by both legs of a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    name: String,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stack: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl RemoteError {
    /// Creates an error with a name and a message
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            fields: Map::new(),
        }
    }

    /// Captures a local error
    ///
    /// The name is the error's type name without its module path, the
    /// message is its `Display` output and the stack lists its `source()`
    /// chain, one cause per line.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        let mut remote = Self::new(short_type_name::<E>(), error.to_string());
        if !causes.is_empty() {
            remote.stack = Some(causes.join("\n"));
        }
        remote
    }

    /// Adds a custom field; `name`, `message` and `stack` are ignored
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !RESERVED_KEYS.contains(&key.as_str()) {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Sets the stack text
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Error name, used for identity matching
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// Looks up a custom field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Checks the error name
    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    /// Writes the wire structure
    pub fn to_wire(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("name".to_string(), Value::String(self.name.clone()));
        map.insert("message".to_string(), Value::String(self.message.clone()));
        if let Some(stack) = &self.stack {
            map.insert("stack".to_string(), Value::String(stack.clone()));
        }
        Value::Object(map)
    }

    /// Rebuilds an error from whatever a peer sent
    ///
    /// Never fails: a missing name becomes [`DEFAULT_ERROR_NAME`], a missing
    /// message becomes empty and a non-object value becomes the message.
    pub fn from_wire(value: &Value) -> Self {
        match value {
            Value::Object(map) => {
                let mut fields = map.clone();
                let name = take_text(&mut fields, "name")
                    .unwrap_or_else(|| DEFAULT_ERROR_NAME.to_string());
                let message = take_text(&mut fields, "message").unwrap_or_default();
                let stack = take_text(&mut fields, "stack");
                Self {
                    name,
                    message,
                    stack,
                    fields,
                }
            }
            Value::String(message) => Self::new(DEFAULT_ERROR_NAME, message.clone()),
            Value::Null => Self::new(DEFAULT_ERROR_NAME, ""),
            other => Self::new(DEFAULT_ERROR_NAME, other.to_string()),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

impl std::error::Error for RemoteError {}

fn take_text(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key)? {
        Value::String(text) => Some(text),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn short_type_name<E: ?Sized>() -> String {
    let full = std::any::type_name::<E>();
    if full.starts_with("dyn ") {
        return DEFAULT_ERROR_NAME.to_string();
    }
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
