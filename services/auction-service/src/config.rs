use gavel_execution::{EngineConfig, SchedulerConfig};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::Level;

pub const SEALED_BID_SECRET_ENV: &str = "GAVEL_SEALED_BID_SECRET";

fn default_port() -> u16 {
    8090
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tick_ms() -> u64 {
    gavel_execution::config::DEFAULT_TICK_MS
}

fn default_live_bid_extension_ms() -> u64 {
    gavel_execution::config::DEFAULT_LIVE_BID_EXTENSION_MS
}

fn default_item_lookahead_ms() -> u64 {
    gavel_execution::config::DEFAULT_ITEM_LOOKAHEAD_MS
}

fn default_leaderboard_ttl_seconds() -> u64 {
    gavel_execution::config::DEFAULT_LEADERBOARD_TTL_SECONDS
}

fn default_cache_prefix() -> String {
    "gavel:".to_string()
}

fn default_event_capacity() -> usize {
    1024
}

/// Output format of the service's log lines.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Deserialize)]
pub struct SealedBidKey {
    pub id: String,
    pub secret: String,
}

#[derive(Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_live_bid_extension_ms")]
    pub live_bid_extension_ms: u64,
    #[serde(default = "default_item_lookahead_ms")]
    pub item_lookahead_ms: u64,
    #[serde(default = "default_leaderboard_ttl_seconds")]
    pub leaderboard_ttl_seconds: u64,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// First entry is the key new bids are sealed with.
    #[serde(default)]
    pub sealed_bid_keys: Vec<SealedBidKey>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0")]
    InvalidNonZero { field: &'static str },
    #[error("at least one sealed bid key is required")]
    MissingSealedBidKeys,
    #[error("sealed bid key id {id:?} must be non-empty and must not contain '.'")]
    InvalidKeyId { id: String },
    #[error("sealed bid key {id} is listed more than once")]
    DuplicateKeyId { id: String },
    #[error("sealed bid key {id} has an empty secret")]
    EmptySecret { id: String },
}

pub struct ValidatedConfig {
    pub port: u16,
    pub log_level: Level,
    pub log_format: LogFormat,
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
    pub redis_url: Option<String>,
    pub cache_prefix: String,
    pub event_capacity: usize,
    pub sealed_bid_keys: Vec<SealedBidKey>,
}

struct RedactedConfig<'a>(&'a ServiceConfig);

impl fmt::Debug for RedactedConfig<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cfg = self.0;
        let key_ids: Vec<&str> = cfg.sealed_bid_keys.iter().map(|k| k.id.as_str()).collect();
        f.debug_struct("ServiceConfig")
            .field("port", &cfg.port)
            .field("log_level", &cfg.log_level)
            .field("log_format", &cfg.log_format)
            .field("tick_ms", &cfg.tick_ms)
            .field("live_bid_extension_ms", &cfg.live_bid_extension_ms)
            .field("item_lookahead_ms", &cfg.item_lookahead_ms)
            .field("leaderboard_ttl_seconds", &cfg.leaderboard_ttl_seconds)
            .field("redis_url", &cfg.redis_url.as_ref().map(|_| "<redacted>"))
            .field("cache_prefix", &cfg.cache_prefix)
            .field("event_capacity", &cfg.event_capacity)
            .field("sealed_bid_keys", &key_ids)
            .finish()
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        RedactedConfig(self).fmt(f)
    }
}

impl fmt::Debug for SealedBidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedBidKey")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn ensure_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field });
    }
    Ok(())
}

impl ServiceConfig {
    pub fn redacted_debug(&self) -> impl fmt::Debug + '_ {
        RedactedConfig(self)
    }

    /// Replace the active key's secret with `secret`, if given.
    pub fn override_active_secret(&mut self, secret: Option<String>) {
        let Some(secret) = secret.filter(|s| !s.is_empty()) else {
            return;
        };
        match self.sealed_bid_keys.first_mut() {
            Some(active) => active.secret = secret,
            None => self.sealed_bid_keys.push(SealedBidKey {
                id: "default".to_string(),
                secret,
            }),
        }
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let log_level = self
            .log_level
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;
        ensure_nonzero("tick_ms", self.tick_ms)?;
        ensure_nonzero("live_bid_extension_ms", self.live_bid_extension_ms)?;
        ensure_nonzero("item_lookahead_ms", self.item_lookahead_ms)?;
        ensure_nonzero("leaderboard_ttl_seconds", self.leaderboard_ttl_seconds)?;
        ensure_nonzero("event_capacity", self.event_capacity as u64)?;

        if self.sealed_bid_keys.is_empty() {
            return Err(ConfigError::MissingSealedBidKeys);
        }
        for (idx, key) in self.sealed_bid_keys.iter().enumerate() {
            if key.id.is_empty() || key.id.contains('.') {
                return Err(ConfigError::InvalidKeyId { id: key.id.clone() });
            }
            if key.secret.is_empty() {
                return Err(ConfigError::EmptySecret { id: key.id.clone() });
            }
            if self.sealed_bid_keys[..idx].iter().any(|k| k.id == key.id) {
                return Err(ConfigError::DuplicateKeyId { id: key.id.clone() });
            }
        }

        Ok(ValidatedConfig {
            port: self.port,
            log_level,
            log_format: self.log_format,
            engine: EngineConfig {
                live_bid_extension_ms: self.live_bid_extension_ms,
                item_lookahead_ms: self.item_lookahead_ms,
                leaderboard_ttl: Duration::from_secs(self.leaderboard_ttl_seconds),
            },
            scheduler: SchedulerConfig {
                tick: Duration::from_millis(self.tick_ms),
            },
            redis_url: self.redis_url,
            cache_prefix: self.cache_prefix,
            event_capacity: self.event_capacity,
            sealed_bid_keys: self.sealed_bid_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "
sealed_bid_keys:
  - id: k2
    secret: current-secret
  - id: k1
    secret: retired-secret
";

    fn parse(yaml: &str) -> ServiceConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn defaults_fill_in_timings() {
        let config = parse(MINIMAL).validate().unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.sealed_bid_keys[0].id, "k2");
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn rejects_invalid_values() {
        let mut config = parse(MINIMAL);
        config.tick_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidNonZero { field: "tick_ms" })
        ));

        let mut config = parse(MINIMAL);
        config.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel { .. })
        ));

        let config = parse("port: 9000\n");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSealedBidKeys)
        ));

        let mut config = parse(MINIMAL);
        config.sealed_bid_keys[1].id = "k2".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateKeyId { .. })
        ));
    }

    #[test]
    fn log_format_accepts_json_only_by_name() {
        let config = parse(&format!("log_format: json\n{MINIMAL}"))
            .validate()
            .unwrap();
        assert_eq!(config.log_format, LogFormat::Json);

        let unknown = serde_yaml::from_str::<ServiceConfig>(&format!("log_format: xml\n{MINIMAL}"));
        assert!(unknown.is_err());
    }

    #[test]
    fn env_secret_replaces_the_active_key() {
        let mut config = parse(MINIMAL);
        config.override_active_secret(Some("from-env".to_string()));
        assert_eq!(config.sealed_bid_keys[0].secret, "from-env");
        assert_eq!(config.sealed_bid_keys[1].secret, "retired-secret");

        let mut empty = parse("{}");
        empty.override_active_secret(Some("from-env".to_string()));
        assert!(empty.validate().is_ok());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let mut config = parse(MINIMAL);
        config.redis_url = Some("redis://:hunter2@cache:6379".to_string());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("current-secret"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("k2"));
    }
}
