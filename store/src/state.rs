//! Shared application state, threaded into every handler via
//! `axum::extract::State`: a single `AppState` struct built once in
//! `main.rs` rather than a grab-bag of globals.

use crate::config::StoreConfig;
use crate::db::Database;
use crate::encryption::EncryptionManager;
use crate::health::HealthChecker;
use crate::tokens::TokenIssuer;
use broker_ca::CertificateAuthority;
use broker_common::rate_limit::RateLimiter;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub encryption: Arc<EncryptionManager>,
    pub ca: Arc<CertificateAuthority>,
    pub tokens: Arc<TokenIssuer>,
    pub operator_rate_limiter: Arc<RateLimiter>,
    pub config: Arc<StoreConfig>,
    pub health: Arc<HealthChecker>,
}
