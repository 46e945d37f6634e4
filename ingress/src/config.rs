//! Configuration loading: compiled-in defaults → optional TOML
//! file → environment variable overrides, mirroring `broker_worker::config`
//! and `broker_store::config` (both themselves generalized from
//! `broker_worker::config`.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub store: StoreClientConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub encryption: EncryptionPathConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8443 }
    }
}

/// Ingress shares the Store's SQLite database read-mostly, to resolve live
/// `Verify`/client-active lookups and to write `tls.rejected` audit
/// entries without inventing a Store HTTP endpoint for
/// concerns that are not the owned-Message write path. `DATABASE_URL`
/// must point at the same file the Store was started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite:///var/lib/broker/store.db".to_string() }
    }
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
    pub internal_url: String,
    pub request_timeout_secs: u64,
}

impl Default for StoreClientConfig {
    fn default() -> Self {
        Self { internal_url: "https://127.0.0.1:8443".to_string(), request_timeout_secs: 10 }
    }
}

/// A single certificate/key pair, used both to terminate inbound mTLS
/// (server role) and to authenticate outbound to the Store's internal API
/// (client role, CN must start with `proxy-` per `store::middleware::
/// require_component_cn`). Ingress is the one component in this workspace
/// that plays both TLS roles over the same identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub ca_cert_path: String,
    pub cert_path: String,
    pub key_path: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca_cert_path: "/etc/broker/tls/ca.pem".to_string(),
            cert_path: "/etc/broker/tls/ingress.pem".to_string(),
            key_path: "/etc/broker/tls/ingress.key".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Keyed-hash salt for `sender_fingerprint`; required,
    /// fails startup if missing — the same invariant `store::config`
    /// enforces, since both processes must derive identical fingerprints
    /// for the same sender number.
    pub sender_hash_salt: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { sender_hash_salt: String::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionPathConfig {
    pub key_path: String,
}

impl Default for EncryptionPathConfig {
    fn default() -> Self {
        Self { key_path: "/etc/broker/keys/data.key".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// `INGRESS_RATE_LIMIT`: per-client tokens/min.
    pub rate_limit_per_minute: u32,
    /// `QUEUE_SOFT_LIMIT`: queue length at which Ingress returns 503
    /// instead of accepting more submissions.
    pub queue_soft_limit: u64,
    /// Request body size cap (defensive).
    pub max_request_body_bytes: usize,
    /// One logical handler per request, bounded by a configurable
    /// concurrency limit (default 256)".
    pub concurrency: usize,
    /// RegisterMessage/Enqueue retry cap ("Ingress retries enqueue
    /// with bounded attempts").
    pub register_retry_attempts: u32,
    pub enqueue_retry_attempts: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 100,
            queue_soft_limit: 10_000,
            max_request_body_bytes: 16 * 1024,
            concurrency: 256,
            register_retry_attempts: 3,
            enqueue_retry_attempts: 3,
        }
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

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            queue: QueueConfig::default(),
            store: StoreClientConfig::default(),
            tls: TlsConfig::default(),
            security: SecurityConfig::default(),
            encryption: EncryptionPathConfig::default(),
            limits: LimitsConfig::default(),
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

impl IngressConfig {
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
        if let Ok(path) = std::env::var("INGRESS_CONFIG") {
            return Some(path);
        }
        for candidate in ["/etc/broker/ingress.toml", "./ingress.toml"] {
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
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("QUEUE_URL") {
            self.queue.url = v;
        }
        if let Ok(v) = std::env::var("STORE_INTERNAL_URL") {
            self.store.internal_url = v;
        }
        if let Ok(v) = std::env::var("CA_CERT_PATH") {
            self.tls.ca_cert_path = v;
        }
        if let Ok(v) = std::env::var("INGRESS_CERT_PATH") {
            self.tls.cert_path = v;
        }
        if let Ok(v) = std::env::var("INGRESS_KEY_PATH") {
            self.tls.key_path = v;
        }
        if let Ok(v) = std::env::var("ENCRYPTION_KEY_PATH") {
            self.encryption.key_path = v;
        }
        if let Ok(v) = std::env::var("SENDER_HASH_SALT") {
            self.security.sender_hash_salt = v;
        }
        if let Ok(v) = std::env::var("INGRESS_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("INGRESS_PORT").and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent)) {
            self.server.port = v;
        }
        if let Ok(v) = std::env::var("INGRESS_RATE_LIMIT").and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent)) {
            self.limits.rate_limit_per_minute = v;
        }
        if let Ok(v) = std::env::var("QUEUE_SOFT_LIMIT").and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent)) {
            self.limits.queue_soft_limit = v;
        }
        if let Ok(v) = std::env::var("RUST_LOG") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("LOG_JSON") {
            self.logging.json = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_string()));
        }
        if self.queue.url.is_empty() {
            return Err(ConfigError::Validation("queue.url must not be empty".to_string()));
        }
        if self.store.internal_url.is_empty() {
            return Err(ConfigError::Validation("store.internal_url must not be empty".to_string()));
        }
        if self.security.sender_hash_salt.is_empty() {
            return Err(ConfigError::Validation("security.sender_hash_salt is required".to_string()));
        }
        if self.server.port == 0 {
            return Err(ConfigError::Validation("server.port must not be 0".to_string()));
        }
        if self.limits.rate_limit_per_minute == 0 {
            return Err(ConfigError::Validation("limits.rate_limit_per_minute must be >= 1".to_string()));
        }
        if self.limits.concurrency == 0 {
            return Err(ConfigError::Validation("limits.concurrency must be >= 1".to_string()));
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
    fn defaults_fail_validation_without_salt() {
        let config = IngressConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn salted_defaults_are_valid() {
        let mut config = IngressConfig::default();
        config.security.sender_hash_salt = "test-salt".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = IngressConfig::default();
        config.security.sender_hash_salt = "test-salt".to_string();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn sample_round_trips() {
        let sample = IngressConfig::generate_sample();
        let parsed: IngressConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.limits.rate_limit_per_minute, IngressConfig::default().limits.rate_limit_per_minute);
    }
}
