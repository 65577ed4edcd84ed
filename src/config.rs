//! Runtime configuration.
//!
//! Values are layered: built-in defaults, then `aquila.toml`, then
//! `aquila.yaml`, then `AQUILA_*` environment variables. Durations are
//! expressed in milliseconds.

use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::constants::model::FALLBACK_MODEL_VERSION;
use crate::constants::retry::*;
use crate::demographics::DemographicKey;
use crate::error::{AppError, Result};
use crate::predictor::PredictOptions;
use crate::reliability::tracing::TracingConfig;
use crate::reliability::{Jitter, ReconnectBackoff};

/// Serde helper for Duration serialization/deserialization as milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Client configuration loaded from multiple sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Hosts serving the Aquila model, tried round-robin
    pub hosts: Vec<String>,

    /// Service port
    pub port: u16,

    /// Maximum number of concurrent requests on the connection
    pub concurrency: usize,

    /// Attempts per prediction, including the first
    pub max_attempts: u32,

    /// Per-attempt deadline
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,

    /// Base of the exponential retry backoff
    #[serde(with = "duration_ms")]
    pub retry_base_delay: Duration,

    /// Delay per consecutive failure before reconnecting
    #[serde(with = "duration_ms")]
    pub reconnect_base_delay: Duration,

    /// Consecutive failures beyond this do not grow the reconnect delay
    pub reconnect_failure_cap: u32,

    /// Deadline for establishing a channel
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Directory holding `<model>-weight.json` / `<model>-bias.json`
    pub demographics_dir: PathBuf,

    /// Gender label ("M", "F"); unset means any
    #[serde(default)]
    pub gender: Option<String>,

    /// Age bucket ("18-19" .. "50+"); unset means any
    #[serde(default)]
    pub age: Option<String>,

    /// Model version assumed when a response omits one
    pub fallback_model_version: String,

    /// Log level used when `RUST_LOG` is unset
    pub log_level: String,

    /// Emit JSON log lines
    pub json_logs: bool,

    /// Prometheus scrape address; metrics are not exported when unset
    #[serde(default)]
    pub metrics_address: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosts: vec!["localhost".to_string()],
            port: DEFAULT_PORT,
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: DEFAULT_TIMEOUT,
            retry_base_delay: DEFAULT_BASE_DELAY,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            reconnect_failure_cap: DEFAULT_RECONNECT_FAILURE_CAP,
            connect_timeout: Duration::from_secs(5),
            demographics_dir: PathBuf::from("demographics"),
            gender: None,
            age: None,
            fallback_model_version: FALLBACK_MODEL_VERSION.to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            metrics_address: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with precedence:
    /// 1. `AQUILA_*` environment variables (highest priority)
    /// 2. aquila.yaml (if exists)
    /// 3. aquila.toml (if exists)
    /// 4. Built-in defaults (lowest priority)
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Self::default_figment()
                .merge(Toml::file("aquila.toml"))
                .merge(Yaml::file("aquila.yaml"))
                .merge(Env::prefixed("AQUILA_")),
        )
    }

    /// Built-in defaults as a figment provider.
    pub fn default_figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    /// Extract and validate a configuration from `figment`.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment
            .extract()
            .map_err(|e| AppError::Config(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;
        debug!("Loaded configuration for hosts {:?}", config.hosts);
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() || self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(AppError::Config(
                "hosts must list at least one non-empty host".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(AppError::Config("port must be non-zero".to_string()));
        }
        if self.concurrency == 0 {
            return Err(AppError::Config("concurrency must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(AppError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.request_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(AppError::Config("timeouts must be non-zero".to_string()));
        }
        if self.fallback_model_version.is_empty() {
            return Err(AppError::Config(
                "fallback_model_version cannot be empty".to_string(),
            ));
        }
        self.demographic_key()?;
        Ok(())
    }

    /// The demographic whose score predictions report.
    pub fn demographic_key(&self) -> Result<DemographicKey> {
        DemographicKey::parse(self.gender.as_deref(), self.age.as_deref())
            .map_err(|e| AppError::Config(format!("invalid demographic: {}", e)))
    }

    pub fn predict_options(&self) -> PredictOptions {
        PredictOptions {
            max_attempts: self.max_attempts,
            timeout: self.request_timeout,
            base_delay: self.retry_base_delay,
        }
    }

    pub fn reconnect_backoff(&self) -> ReconnectBackoff {
        ReconnectBackoff {
            base: self.reconnect_base_delay,
            failure_cap: self.reconnect_failure_cap,
            jitter: Jitter::Full,
        }
    }

    pub fn tracing_config(&self) -> TracingConfig {
        TracingConfig {
            log_level: self.log_level.clone(),
            json: self.json_logs,
        }
    }

    /// Export configuration to TOML format
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize to TOML: {}", e)))
    }

    /// Export configuration to YAML format
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize to YAML: {}", e)))
    }
}
