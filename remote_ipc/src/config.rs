//! Service configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Call timeout used when a configuration does not set one
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Configuration channel must not be empty")]
    EmptyChannel,
}

/// Settings shared by the responder and the caller side of a service
///
/// ```json
/// { "channel": "rpc", "callTimeoutMs": 3000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Topic requests are sent on and responses come back on
    pub channel: String,

    /// Default timeout for calls made through this service
    #[serde(
        rename = "callTimeoutMs",
        with = "millis",
        default = "default_call_timeout"
    )]
    pub call_timeout: Duration,
}

impl ServiceConfig {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Parses and validates a JSON configuration document
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.trim().is_empty() {
            return Err(ConfigError::EmptyChannel);
        }
        Ok(())
    }
}

fn default_call_timeout() -> Duration {
    DEFAULT_CALL_TIMEOUT
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::new("rpc");
        assert_eq!(config.channel, "rpc");
        assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
    }

    #[test]
    fn test_from_json() {
        let config = ServiceConfig::from_json(r#"{"channel": "rpc", "callTimeoutMs": 250}"#).unwrap();
        assert_eq!(config.call_timeout, Duration::from_millis(250));

        let config = ServiceConfig::from_json(r#"{"channel": "rpc"}"#).unwrap();
        assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
    }

    #[test]
    fn test_empty_channel_rejected() {
        assert!(matches!(
            ServiceConfig::from_json(r#"{"channel": " "}"#),
            Err(ConfigError::EmptyChannel)
        ));
        assert!(matches!(
            ServiceConfig::from_json(r#"{"callTimeoutMs": 10}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_serialize_round_trip() {
        let config = ServiceConfig::new("rpc").with_call_timeout(Duration::from_millis(1500));
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(text, r#"{"channel":"rpc","callTimeoutMs":1500}"#);
        assert_eq!(ServiceConfig::from_json(&text).unwrap(), config);
    }
}
