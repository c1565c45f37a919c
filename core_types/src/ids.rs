//! Unique identifiers for calls and listeners

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Correlation id of a single remote invocation
///
/// Generated fresh per call as a UUID v4 string. Peers may use any string,
/// so ids read off the wire are kept verbatim rather than parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Creates a new random call ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an id received from a peer
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as sent on the wire
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a transport listener
///
/// The caller keeps one correlation table per (listener, topic) pair. Two
/// handles to the same underlying listener must report the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Creates a new random listener ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a listener ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_call_id_creation() {
        let id1 = CallId::new();
        let id2 = CallId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_call_ids_are_pairwise_distinct() {
        let ids: HashSet<CallId> = (0..1000).map(|_| CallId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_call_id_is_uuid_text() {
        let id = CallId::new();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_call_id_serializes_as_plain_string() {
        let id = CallId::from_string("abc-1");
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json, serde_json::json!("abc-1"));

        let back: CallId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_listener_id_creation() {
        let id1 = ListenerId::new();
        let id2 = ListenerId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_listener_id_from_uuid() {
        let uuid = Uuid::new_v4();
        let id = ListenerId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }
}
