//! Shared application state for the Ingress HTTP server, mirroring
//! `broker_store::state::AppState`'s one-`Arc`-per-dependency shape.

use crate::config::IngressConfig;
use crate::metrics::IngressMetrics;
use crate::store_client::StoreClient;
use broker_ca::CertificateRegistry;
use broker_common::encryption::EncryptionManager;
use broker_common::rate_limit::RateLimiter;
use broker_queue::Queue;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Shared, read-mostly access to the Store's database — used only for
    /// the CA registry, `clients::find`, and `audit::record` (see
    /// `middleware::authenticate`). The owned Message write path never
    /// touches this pool; it goes through `store_client` instead.
    pub db_pool: SqlitePool,
    pub ca_registry: Arc<dyn CertificateRegistry>,
    pub queue: Arc<Queue>,
    pub store_client: Arc<StoreClient>,
    pub encryption: Arc<EncryptionManager>,
    pub sender_hash_salt: Arc<String>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<IngressMetrics>,
    pub config: Arc<IngressConfig>,
    pub started_at: Instant,
}
