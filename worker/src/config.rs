//! Configuration loading: compiled-in defaults → optional TOML
//! file → environment variable overrides, mirroring `broker_store::config`.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub store: StoreClientConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub worker: WorkerPoolConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub url: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { url: "sqlite:///var/lib/broker/queue.db".to_string() }
    }
}

/// Connection details for the Store's internal mTLS API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreClientConfig {
    /// Base URL, e.g. `https://store.internal:8443`.
    pub internal_url: String,
    pub request_timeout_secs: u64,
}

impl Default for StoreClientConfig {
    fn default() -> Self {
        Self { internal_url: "https://127.0.0.1:8443".to_string(), request_timeout_secs: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub ca_cert_path: String,
    /// This worker process's own component certificate (CN must start with
    /// `worker-`, per `store::middleware::require_component_cn`).
    pub client_cert_path: String,
    pub client_key_path: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca_cert_path: "/etc/broker/tls/ca.pem".to_string(),
            client_cert_path: "/etc/broker/tls/worker.pem".to_string(),
            client_key_path: "/etc/broker/tls/worker.key".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    pub retry_interval_secs: u64,
    pub max_attempts: u32,
    pub concurrency: usize,
    /// Timeout applied to the `PopBlocking` queue wait per slot iteration
    /// Blocking pop timeout against the Queue.
    pub pop_timeout_secs: u64,
    /// Delivery call timeout.
    pub delivery_timeout_secs: u64,
    /// Grace period given to in-flight deliveries on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: 30,
            max_attempts: 10_000,
            concurrency: 4,
            pop_timeout_secs: 5,
            delivery_timeout_secs: 10,
            shutdown_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 9102 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            store: StoreClientConfig::default(),
            tls: TlsConfig::default(),
            worker: WorkerPoolConfig::default(),
            health: HealthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl WorkerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn find_config_file() -> Option<String> {
        if let Ok(path) = std::env::var("WORKER_CONFIG") {
            return Some(path);
        }
        for candidate in ["/etc/broker/worker.toml", "./worker.toml"] {
            if Path::new(candidate).exists() {
                return Some(candidate.to_string());
            }
        }
        None
    }

    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead { path: path.to_string(), source: e })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse { path: path.to_string(), source: e })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("QUEUE_URL") {
            self.queue.url = v;
        }
        if let Ok(v) = std::env::var("STORE_INTERNAL_URL") {
            self.store.internal_url = v;
        }
        if let Ok(v) = std::env::var("CA_CERT_PATH") {
            self.tls.ca_cert_path = v;
        }
        if let Ok(v) = std::env::var("WORKER_CERT_PATH") {
            self.tls.client_cert_path = v;
        }
        if let Ok(v) = std::env::var("WORKER_KEY_PATH") {
            self.tls.client_key_path = v;
        }
        if let Ok(v) = std::env::var("WORKER_RETRY_INTERVAL").and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent)) {
            self.worker.retry_interval_secs = v;
        }
        if let Ok(v) = std::env::var("WORKER_MAX_ATTEMPTS").and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent)) {
            self.worker.max_attempts = v;
        }
        if let Ok(v) = std::env::var("WORKER_CONCURRENCY").and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent)) {
            self.worker.concurrency = v;
        }
        if let Ok(v) = std::env::var("WORKER_HEALTH_HOST") {
            self.health.host = v;
        }
        if let Ok(v) = std::env::var("WORKER_HEALTH_PORT").and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent)) {
            self.health.port = v;
        }
        if let Ok(v) = std::env::var("RUST_LOG") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("LOG_JSON") {
            self.logging.json = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.url.is_empty() {
            return Err(ConfigError::Validation("queue.url must not be empty".to_string()));
        }
        if self.store.internal_url.is_empty() {
            return Err(ConfigError::Validation("store.internal_url must not be empty".to_string()));
        }
        if self.worker.concurrency == 0 {
            return Err(ConfigError::Validation("worker.concurrency must be >= 1".to_string()));
        }
        if self.worker.max_attempts == 0 {
            return Err(ConfigError::Validation("worker.max_attempts must be >= 1".to_string()));
        }
        Ok(())
    }

    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default()).expect("default config always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        WorkerConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = WorkerConfig::default();
        config.worker.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn sample_round_trips() {
        let sample = WorkerConfig::generate_sample();
        let parsed: WorkerConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.worker.concurrency, WorkerConfig::default().worker.concurrency);
    }
}
