//! Topic configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resolves the name of the topic a sender publishes to.
///
/// Lookups must be pure: the sender calls this once per published message.
pub trait TopicConfiguration {
    /// Short name of the topic to publish to.
    fn topic_name(&self) -> &str;
}

impl TopicConfiguration for str {
    fn topic_name(&self) -> &str {
        self
    }
}

impl TopicConfiguration for String {
    fn topic_name(&self) -> &str {
        self
    }
}

impl<T: TopicConfiguration + ?Sized> TopicConfiguration for &T {
    fn topic_name(&self) -> &str {
        (**self).topic_name()
    }
}

impl<T: TopicConfiguration + ?Sized> TopicConfiguration for std::sync::Arc<T> {
    fn topic_name(&self) -> &str {
        (**self).topic_name()
    }
}

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Pub/Sub connection and topic settings.
///
/// Can be deserialized from any serde format, or loaded from the
/// environment with [`PubsubConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubsubConfig {
    /// Google Cloud project owning the topic.
    pub project_id: String,
    /// Short topic name, without the `projects/.../topics/` prefix.
    pub topic: String,
    /// API base URL; the public endpoint is used when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Static OAuth2 access token sent as a bearer token.
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Request timeout, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl PubsubConfig {
    /// Settings for `topic` in `project_id`, with the default timeout and
    /// the public endpoint.
    pub fn new(project_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            topic: topic.into(),
            endpoint: None,
            bearer_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Load the configuration from environment variables.
    ///
    /// | Variable                | Field                          |
    /// |-------------------------|--------------------------------|
    /// | `PUBSUB_PROJECT_ID`     | `project_id` (required)        |
    /// | `PUBSUB_TOPIC`          | `topic` (required)             |
    /// | `PUBSUB_ENDPOINT`       | `endpoint`                     |
    /// | `PUBSUB_EMULATOR_HOST`  | `endpoint` as `http://{host}`  |
    /// | `PUBSUB_BEARER_TOKEN`   | `bearer_token`                 |
    /// | `PUBSUB_TIMEOUT_SECS`   | `timeout_secs`                 |
    ///
    /// `PUBSUB_ENDPOINT` takes precedence over `PUBSUB_EMULATOR_HOST`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::missing(name))
        };

        let mut config = Self::new(required("PUBSUB_PROJECT_ID")?, required("PUBSUB_TOPIC")?);

        config.endpoint = lookup("PUBSUB_ENDPOINT")
            .or_else(|| lookup("PUBSUB_EMULATOR_HOST").map(|host| format!("http://{host}")));
        config.bearer_token = lookup("PUBSUB_BEARER_TOKEN");

        if let Some(raw) = lookup("PUBSUB_TIMEOUT_SECS") {
            config.timeout_secs = raw
                .parse()
                .map_err(|_| ConfigError::invalid("PUBSUB_TIMEOUT_SECS", raw))?;
        }

        Ok(config)
    }

    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl TopicConfiguration for PubsubConfig {
    fn topic_name(&self) -> &str {
        &self.topic
    }
}

/// Error returned when the configuration cannot be loaded.
#[derive(Debug)]
pub struct ConfigError {
    kind: ConfigErrorKind,
}

#[derive(Debug)]
enum ConfigErrorKind {
    Missing(&'static str),
    Invalid { name: &'static str, value: String },
}

impl ConfigError {
    fn missing(name: &'static str) -> Self {
        Self {
            kind: ConfigErrorKind::Missing(name),
        }
    }

    fn invalid(name: &'static str, value: String) -> Self {
        Self {
            kind: ConfigErrorKind::Invalid { name, value },
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ConfigErrorKind::Missing(name) => write!(f, "Missing configuration variable {name}"),
            ConfigErrorKind::Invalid { name, value } => {
                write!(f, "Invalid value {value:?} for configuration variable {name}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn loads_required_and_default_values() {
        let config = PubsubConfig::from_lookup(lookup(&[
            ("PUBSUB_PROJECT_ID", "acme"),
            ("PUBSUB_TOPIC", "orders"),
        ]))
        .unwrap();

        assert_eq!(config.topic_name(), "orders");
        assert_eq!(config.project_id, "acme");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.endpoint.is_none());
    }

    #[test]
    fn emulator_host_becomes_plain_http_endpoint() {
        let config = PubsubConfig::from_lookup(lookup(&[
            ("PUBSUB_PROJECT_ID", "acme"),
            ("PUBSUB_TOPIC", "orders"),
            ("PUBSUB_EMULATOR_HOST", "localhost:8085"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:8085"));
    }

    #[test]
    fn explicit_endpoint_wins_over_emulator() {
        let config = PubsubConfig::from_lookup(lookup(&[
            ("PUBSUB_PROJECT_ID", "acme"),
            ("PUBSUB_TOPIC", "orders"),
            ("PUBSUB_ENDPOINT", "https://europe-west1-pubsub.googleapis.com"),
            ("PUBSUB_EMULATOR_HOST", "localhost:8085"),
        ]))
        .unwrap();

        assert_eq!(
            config.endpoint.as_deref(),
            Some("https://europe-west1-pubsub.googleapis.com")
        );
    }

    #[test]
    fn empty_topic_is_missing() {
        let err = PubsubConfig::from_lookup(lookup(&[
            ("PUBSUB_PROJECT_ID", "acme"),
            ("PUBSUB_TOPIC", ""),
        ]))
        .unwrap_err();

        assert!(err.to_string().contains("PUBSUB_TOPIC"));
    }

    #[test]
    fn rejects_non_numeric_timeout() {
        let err = PubsubConfig::from_lookup(lookup(&[
            ("PUBSUB_PROJECT_ID", "acme"),
            ("PUBSUB_TOPIC", "orders"),
            ("PUBSUB_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();

        assert!(err.to_string().contains("soon"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: PubsubConfig =
            serde_json::from_str(r#"{"project_id":"acme","topic":"orders"}"#).unwrap();

        assert_eq!(config, PubsubConfig::new("acme", "orders"));
    }
}
