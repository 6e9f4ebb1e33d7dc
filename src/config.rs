//! Relay configuration: YAML file, then `RELAY_*` environment overrides,
//! then validation.
//!
//! ```yaml
//! app:
//!   name: outbox-relay
//!   env: prod
//! log:
//!   level: info
//!   format: json
//! dispatcher:
//!   poll_interval_ms: 1000
//!   batch_size: 50
//! consumer:
//!   topic: user.events
//!   dlq_topic: user.events.dlq
//!   group: user-events-consumer
//!   max_retries: 3
//! ```
//!
//! Every field is optional. An override variable is the upper-cased path
//! joined by `_` and prefixed with `RELAY_`, e.g. `RELAY_CONSUMER_MAX_RETRIES=5`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::consumer::ConsumerConfig;
use crate::dispatcher::DispatcherConfig;

pub const ENV_PREFIX: &str = "RELAY_";

/// Longest accepted idempotency marker lifetime: one year.
pub const MAX_IDEMPOTENCY_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file {path:?} failed")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config failed")]
    Parse(#[from] serde_yaml::Error),
    #[error("environment override {key}={value:?} is not valid")]
    InvalidEnv { key: String, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub app: AppConfig,
    pub log: LogConfig,
    pub dispatcher: DispatcherSection,
    pub consumer: ConsumerSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub env: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "outbox-relay".to_string(),
            env: "dev".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => f.write_str("json"),
            LogFormat::Text => f.write_str("text"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// debug / info / warn / error, or any `EnvFilter` directive
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            batch_size: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConsumerSection {
    pub topic: String,
    pub dlq_topic: String,
    pub group: String,
    pub max_retries: u32,
    pub idempotency_ttl_secs: u64,
    pub fetch_max_records: usize,
    pub fetch_timeout_ms: u64,
    pub error_backoff_ms: u64,
}

impl Default for ConsumerSection {
    fn default() -> Self {
        Self {
            topic: "user.events".to_string(),
            dlq_topic: "user.events.dlq".to_string(),
            group: "user-events-consumer".to_string(),
            max_retries: 3,
            idempotency_ttl_secs: 24 * 60 * 60,
            fetch_max_records: 100,
            fetch_timeout_ms: 1_000,
            error_backoff_ms: 1_000,
        }
    }
}

impl RelayConfig {
    /// Load `path`, apply `RELAY_*` overrides from the process environment
    /// and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_yaml_str(&raw)?;
        config.apply_env_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without overrides or validation. An empty document is
    /// all defaults.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply every `RELAY_*` pair in `vars`. Other variables, and unknown
    /// `RELAY_*` keys, are ignored.
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };

            match name {
                "APP_NAME" => self.app.name = value,
                "APP_ENV" => self.app.env = value,
                "LOG_LEVEL" => self.log.level = value,
                "LOG_FORMAT" => self.log.format = parse_env(&key, &value)?,
                "DISPATCHER_POLL_INTERVAL_MS" => {
                    self.dispatcher.poll_interval_ms = parse_env(&key, &value)?
                }
                "DISPATCHER_BATCH_SIZE" => self.dispatcher.batch_size = parse_env(&key, &value)?,
                "CONSUMER_TOPIC" => self.consumer.topic = value,
                "CONSUMER_DLQ_TOPIC" => self.consumer.dlq_topic = value,
                "CONSUMER_GROUP" => self.consumer.group = value,
                "CONSUMER_MAX_RETRIES" => self.consumer.max_retries = parse_env(&key, &value)?,
                "CONSUMER_IDEMPOTENCY_TTL_SECS" => {
                    self.consumer.idempotency_ttl_secs = parse_env(&key, &value)?
                }
                "CONSUMER_FETCH_MAX_RECORDS" => {
                    self.consumer.fetch_max_records = parse_env(&key, &value)?
                }
                "CONSUMER_FETCH_TIMEOUT_MS" => {
                    self.consumer.fetch_timeout_ms = parse_env(&key, &value)?
                }
                "CONSUMER_ERROR_BACKOFF_MS" => {
                    self.consumer.error_backoff_ms = parse_env(&key, &value)?
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.consumer;
        if self.dispatcher.batch_size == 0 {
            return Err(ConfigError::Invalid("dispatcher.batch_size must be at least 1".into()));
        }
        if self.dispatcher.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("dispatcher.poll_interval_ms must be positive".into()));
        }
        if c.max_retries == 0 {
            return Err(ConfigError::Invalid("consumer.max_retries must be at least 1".into()));
        }
        if !(1..=MAX_IDEMPOTENCY_TTL_SECS).contains(&c.idempotency_ttl_secs) {
            return Err(ConfigError::Invalid(format!(
                "consumer.idempotency_ttl_secs must be between 1 and {MAX_IDEMPOTENCY_TTL_SECS}"
            )));
        }
        if c.fetch_max_records == 0 {
            return Err(ConfigError::Invalid("consumer.fetch_max_records must be at least 1".into()));
        }
        if c.topic.trim().is_empty() || c.dlq_topic.trim().is_empty() {
            return Err(ConfigError::Invalid("consumer topics must not be empty".into()));
        }
        if c.topic == c.dlq_topic {
            return Err(ConfigError::Invalid(
                "consumer.dlq_topic must differ from consumer.topic".into(),
            ));
        }
        if c.group.trim().is_empty() {
            return Err(ConfigError::Invalid("consumer.group must not be empty".into()));
        }
        Ok(())
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::default()
            .with_poll_interval(Duration::from_millis(self.dispatcher.poll_interval_ms))
            .with_batch_size(self.dispatcher.batch_size)
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        let c = &self.consumer;
        ConsumerConfig::new(c.dlq_topic.as_str())
            .with_max_retries(c.max_retries)
            .with_idempotency_ttl(Duration::from_secs(c.idempotency_ttl_secs))
            .with_fetch_max_records(c.fetch_max_records)
            .with_fetch_timeout(Duration::from_millis(c.fetch_timeout_ms))
            .with_error_backoff(Duration::from_millis(c.error_backoff_ms))
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let config = RelayConfig::from_yaml_str("").unwrap();

        assert_eq!(config.app.name, "outbox-relay");
        assert_eq!(config.app.env, "dev");
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.consumer.topic, "user.events");
        assert_eq!(config.consumer.dlq_topic, "user.events.dlq");
        assert_eq!(config.consumer.group, "user-events-consumer");
        assert_eq!(config.dispatcher_config(), DispatcherConfig::default());
        assert_eq!(config.consumer_config(), ConsumerConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = r#"
app:
  env: prod
log:
  format: text
consumer:
  max_retries: 5
"#;
        let config = RelayConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.app.name, "outbox-relay");
        assert_eq!(config.app.env, "prod");
        assert_eq!(config.log.format, LogFormat::Text);
        assert_eq!(config.consumer.max_retries, 5);
        assert_eq!(config.consumer.topic, "user.events");
        assert_eq!(config.dispatcher.batch_size, 50);
    }

    #[test]
    fn env_overrides_yaml() {
        let mut config = RelayConfig::from_yaml_str("consumer:\n  max_retries: 5\n").unwrap();

        config
            .apply_env_overrides(vars(&[
                ("RELAY_CONSUMER_MAX_RETRIES", "7"),
                ("RELAY_DISPATCHER_POLL_INTERVAL_MS", "250"),
                ("RELAY_LOG_FORMAT", "TEXT"),
                ("RELAY_UNKNOWN", "x"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();

        assert_eq!(config.consumer.max_retries, 7);
        assert_eq!(
            config.dispatcher_config().poll_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.log.format, LogFormat::Text);
    }

    #[test]
    fn unparsable_env_override_is_an_error() {
        let mut config = RelayConfig::default();

        let err = config
            .apply_env_overrides(vars(&[("RELAY_CONSUMER_MAX_RETRIES", "many")]))
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "RELAY_CONSUMER_MAX_RETRIES"));
    }

    #[test]
    fn validation_rejects_unusable_values() {
        let mut config = RelayConfig::default();
        config.consumer.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.consumer.dlq_topic = config.consumer.topic.clone();
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.dispatcher.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn idempotency_ttl_must_be_bounded() {
        let mut config = RelayConfig::default();
        let forever = u64::MAX.to_string();
        config
            .apply_env_overrides(vars(&[("RELAY_CONSUMER_IDEMPOTENCY_TTL_SECS", forever.as_str())]))
            .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.consumer.idempotency_ttl_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.consumer.idempotency_ttl_secs = MAX_IDEMPOTENCY_TTL_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        assert!(matches!(
            RelayConfig::from_yaml_str("consumer: [1, 2"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let path = std::env::temp_dir().join(format!("relay-config-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "consumer:\n  group: audit-workers").unwrap();
        drop(file);

        let config = RelayConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.consumer.group, "audit-workers");
    }

    #[test]
    fn load_reports_missing_file() {
        assert!(matches!(
            RelayConfig::load("/definitely/not/here.yaml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
