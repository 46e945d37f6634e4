//! Store configuration: compiled-in defaults, an
//! optional TOML file, then environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub tls: TlsConfig,
    pub encryption: EncryptionPathConfig,
    pub security: SecurityConfig,
    pub worker_defaults: WorkerDefaultsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub internal_host: String,
    pub internal_port: u16,
    pub operator_host: String,
    pub operator_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `DATABASE_URL`.
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// `CA_CERT_PATH`.
    pub ca_cert_path: PathBuf,
    /// `CA_KEY_PATH` — the Store's operator `ManageCertificates` surface
    /// wraps the CA's operations directly, so the Store process needs the
    /// CA's private key, not just its public certificate. Lives under the
    /// same well-known directory as the other filesystem material.
    pub ca_key_path: PathBuf,
    /// `SERVER_CERT_PATH`.
    pub server_cert_path: PathBuf,
    /// `SERVER_KEY_PATH`.
    pub server_key_path: PathBuf,
    /// `OPERATOR_CERT_PATH` — the operator API's server-only TLS cert
    /// (no client cert required, unlike the internal mTLS listener).
    /// Defaults to the same cert as the internal listener when unset.
    pub operator_cert_path: PathBuf,
    /// `OPERATOR_KEY_PATH`.
    pub operator_key_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionPathConfig {
    /// `ENCRYPTION_KEY_PATH`.
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// `SENDER_HASH_SALT`. Required; left empty only in `Default` so the
    /// validation step can report it as missing rather than panicking
    /// during deserialization.
    pub sender_hash_salt: String,
    /// `JWT_SECRET`.
    pub jwt_secret: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDefaultsConfig {
    /// `WORKER_RETRY_INTERVAL`.
    pub retry_interval_secs: u64,
    /// `WORKER_MAX_ATTEMPTS`.
    pub max_attempts: u32,
    /// `WORKER_CONCURRENCY`.
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            tls: TlsConfig::default(),
            encryption: EncryptionPathConfig::default(),
            security: SecurityConfig::default(),
            worker_defaults: WorkerDefaultsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            internal_host: "0.0.0.0".to_string(),
            internal_port: 8443,
            operator_host: "0.0.0.0".to_string(),
            operator_port: 8444,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite:///var/lib/broker/store.db".to_string(), max_connections: 32 }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca_cert_path: PathBuf::from("/etc/broker/tls/ca.pem"),
            ca_key_path: PathBuf::from("/etc/broker/tls/ca-key.pem"),
            server_cert_path: PathBuf::from("/etc/broker/tls/store.pem"),
            server_key_path: PathBuf::from("/etc/broker/tls/store-key.pem"),
            operator_cert_path: PathBuf::from("/etc/broker/tls/store-operator.pem"),
            operator_key_path: PathBuf::from("/etc/broker/tls/store-operator-key.pem"),
        }
    }
}

impl Default for EncryptionPathConfig {
    fn default() -> Self {
        Self { key_path: PathBuf::from("/etc/broker/keys/data.key") }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            sender_hash_salt: String::new(),
            jwt_secret: String::new(),
            access_token_minutes: 30,
            refresh_token_days: 14,
        }
    }
}

impl Default for WorkerDefaultsConfig {
    fn default() -> Self {
        Self { retry_interval_secs: 30, max_attempts: 10_000, concurrency: 4 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

impl StoreConfig {
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(config_path) = Self::find_config_file() {
            if let Ok(file_config) = Self::load_from_file(&config_path) {
                config = file_config;
            }
        }

        config.apply_env_overrides();
        config
    }

    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.clone(), e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("STORE_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/broker/store.toml")),
            Some(PathBuf::from("./store.toml")),
        ];
        paths.into_iter().flatten().find(|p| p.exists())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(path) = std::env::var("CA_CERT_PATH") {
            self.tls.ca_cert_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("CA_KEY_PATH") {
            self.tls.ca_key_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("SERVER_CERT_PATH") {
            self.tls.server_cert_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("SERVER_KEY_PATH") {
            self.tls.server_key_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("OPERATOR_CERT_PATH") {
            self.tls.operator_cert_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("OPERATOR_KEY_PATH") {
            self.tls.operator_key_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("ENCRYPTION_KEY_PATH") {
            self.encryption.key_path = PathBuf::from(path);
        }
        if let Ok(salt) = std::env::var("SENDER_HASH_SALT") {
            self.security.sender_hash_salt = salt;
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.security.jwt_secret = secret;
        }
        if let Ok(secs) = std::env::var("WORKER_RETRY_INTERVAL") {
            if let Ok(secs) = secs.parse() {
                self.worker_defaults.retry_interval_secs = secs;
            }
        }
        if let Ok(attempts) = std::env::var("WORKER_MAX_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse() {
                self.worker_defaults.max_attempts = attempts;
            }
        }
        if let Ok(n) = std::env::var("WORKER_CONCURRENCY") {
            if let Ok(n) = n.parse() {
                self.worker_defaults.concurrency = n;
            }
        }
        if let Ok(host) = std::env::var("STORE_INTERNAL_HOST") {
            self.server.internal_host = host;
        }
        if let Ok(port) = std::env::var("STORE_INTERNAL_PORT") {
            if let Ok(port) = port.parse() {
                self.server.internal_port = port;
            }
        }
        if let Ok(host) = std::env::var("STORE_OPERATOR_HOST") {
            self.server.operator_host = host;
        }
        if let Ok(port) = std::env::var("STORE_OPERATOR_PORT") {
            if let Ok(port) = port.parse() {
                self.server.operator_port = port;
            }
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(json) = std::env::var("LOG_JSON") {
            self.logging.json = json.parse().unwrap_or(false);
        }
    }

    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// A missing `SENDER_HASH_SALT` or `JWT_SECRET` is a fatal
    /// configuration error — the process must refuse to start (exit code
    /// 1), never silently use a default secret.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.internal_port == 0 || self.server.operator_port == 0 {
            return Err(ConfigError::Validation("server ports cannot be 0".to_string()));
        }
        if self.database.url.is_empty() {
            return Err(ConfigError::Validation("DATABASE_URL cannot be empty".to_string()));
        }
        if self.security.sender_hash_salt.is_empty() {
            return Err(ConfigError::Validation("SENDER_HASH_SALT is required".to_string()));
        }
        if self.security.jwt_secret.is_empty() {
            return Err(ConfigError::Validation("JWT_SECRET is required".to_string()));
        }
        if self.worker_defaults.concurrency == 0 {
            return Err(ConfigError::Validation("WORKER_CONCURRENCY must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum ConfigError {
    FileRead(PathBuf, String),
    Parse(String),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, err) => write!(f, "failed to read config file {path:?}: {err}"),
            ConfigError::Parse(err) => write!(f, "failed to parse config: {err}"),
            ConfigError::Validation(err) => write!(f, "config validation failed: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_ports() {
        let config = StoreConfig::default();
        assert_eq!(config.server.internal_port, 8443);
        assert_eq!(config.server.operator_port, 8444);
    }

    #[test]
    fn validation_rejects_missing_secrets() {
        let config = StoreConfig::default();
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default();
        config.security.sender_hash_salt = "salt".to_string();
        config.security.jwt_secret = "secret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_zero_concurrency() {
        let mut config = StoreConfig::default();
        config.security.sender_hash_salt = "salt".to_string();
        config.security.jwt_secret = "secret".to_string();
        config.worker_defaults.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn generate_sample_contains_all_sections() {
        let sample = StoreConfig::generate_sample();
        assert!(sample.contains("[server]"));
        assert!(sample.contains("[database]"));
        assert!(sample.contains("[tls]"));
        assert!(sample.contains("[security]"));
    }
}
