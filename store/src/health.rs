//! Health check and readiness probes.

use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: i64,
    pub components: Vec<ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub alive: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub reason: Option<String>,
    pub timestamp: i64,
}

pub struct HealthChecker {
    start_time: Instant,
    version: String,
}

impl HealthChecker {
    pub fn new(version: &str) -> Self {
        Self { start_time: Instant::now(), version: version.to_string() }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn liveness(&self) -> LivenessResponse {
        LivenessResponse { alive: true, timestamp: chrono::Utc::now().timestamp() }
    }

    pub async fn check_database(&self, db: &crate::db::Database) -> ComponentHealth {
        let start = Instant::now();
        match db.health_check().await {
            Ok(_) => ComponentHealth {
                name: "database".to_string(),
                status: HealthStatus::Healthy,
                message: Some("connected".to_string()),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(e) => ComponentHealth {
                name: "database".to_string(),
                status: HealthStatus::Unhealthy,
                message: Some(format!("connection failed: {e}")),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
        }
    }

    pub async fn check_encryption(&self, manager: &crate::encryption::EncryptionManager) -> ComponentHealth {
        let start = Instant::now();
        let status = if manager.is_available().await { HealthStatus::Healthy } else { HealthStatus::Unhealthy };
        ComponentHealth {
            name: "encryption".to_string(),
            status,
            message: None,
            latency_ms: Some(start.elapsed().as_millis() as u64),
        }
    }

    fn aggregate_status(components: &[ComponentHealth]) -> HealthStatus {
        let mut has_unhealthy = false;
        let mut has_degraded = false;
        for component in components {
            match component.status {
                HealthStatus::Unhealthy => has_unhealthy = true,
                HealthStatus::Degraded => has_degraded = true,
                HealthStatus::Healthy => {}
            }
        }
        if has_unhealthy {
            HealthStatus::Unhealthy
        } else if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn build_response(&self, components: Vec<ComponentHealth>) -> HealthResponse {
        let status = Self::aggregate_status(&components);
        HealthResponse {
            status,
            version: self.version.clone(),
            uptime_seconds: self.uptime_seconds(),
            timestamp: chrono::Utc::now().timestamp(),
            components,
        }
    }

    pub fn readiness(&self, components: &[ComponentHealth]) -> ReadinessResponse {
        let db_healthy = components
            .iter()
            .find(|c| c.name == "database")
            .map(|c| c.status == HealthStatus::Healthy)
            .unwrap_or(false);

        if db_healthy {
            ReadinessResponse { ready: true, reason: None, timestamp: chrono::Utc::now().timestamp() }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some("database not ready".to_string()),
                timestamp: chrono::Utc::now().timestamp(),
            }
        }
    }
}

/// Startup health checker, run once during process initialization before
/// the server starts accepting connections.
pub struct StartupChecker {
    checks_passed: Vec<String>,
    checks_failed: Vec<(String, String)>,
}

impl StartupChecker {
    pub fn new() -> Self {
        Self { checks_passed: Vec::new(), checks_failed: Vec::new() }
    }

    pub fn pass(&mut self, check_name: &str) {
        self.checks_passed.push(check_name.to_string());
    }

    pub fn fail(&mut self, check_name: &str, reason: &str) {
        self.checks_failed.push((check_name.to_string(), reason.to_string()));
    }

    pub fn is_healthy(&self) -> bool {
        self.checks_failed.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut msg = format!("startup checks: {} passed", self.checks_passed.len());
        if !self.checks_failed.is_empty() {
            msg.push_str(&format!(", {} failed", self.checks_failed.len()));
            for (name, reason) in &self.checks_failed {
                msg.push_str(&format!("\n  - {name}: {reason}"));
            }
        }
        msg
    }
}

impl Default for StartupChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_aggregation() {
        let healthy = vec![ComponentHealth {
            name: "db".to_string(),
            status: HealthStatus::Healthy,
            message: None,
            latency_ms: Some(5),
        }];
        assert_eq!(HealthChecker::aggregate_status(&healthy), HealthStatus::Healthy);

        let degraded = vec![
            ComponentHealth { name: "db".to_string(), status: HealthStatus::Healthy, message: None, latency_ms: Some(5) },
            ComponentHealth {
                name: "encryption".to_string(),
                status: HealthStatus::Degraded,
                message: None,
                latency_ms: Some(10),
            },
        ];
        assert_eq!(HealthChecker::aggregate_status(&degraded), HealthStatus::Degraded);

        let unhealthy = vec![ComponentHealth {
            name: "db".to_string(),
            status: HealthStatus::Unhealthy,
            message: None,
            latency_ms: Some(100),
        }];
        assert_eq!(HealthChecker::aggregate_status(&unhealthy), HealthStatus::Unhealthy);
    }

    #[test]
    fn startup_checker_tracks_failures() {
        let mut checker = StartupChecker::new();
        checker.pass("database");
        assert!(checker.is_healthy());
        checker.fail("ca", "no active CA found");
        assert!(!checker.is_healthy());
        assert!(checker.summary().contains("1 failed"));
    }

    #[test]
    fn liveness_is_always_alive() {
        let checker = HealthChecker::new("0.1.0");
        let response = checker.liveness();
        assert!(response.alive);
        assert!(response.timestamp > 0);
    }

    #[test]
    fn readiness_depends_on_database() {
        let checker = HealthChecker::new("0.1.0");
        let unhealthy_db = vec![ComponentHealth {
            name: "database".to_string(),
            status: HealthStatus::Unhealthy,
            message: None,
            latency_ms: None,
        }];
        assert!(!checker.readiness(&unhealthy_db).ready);
    }
}
