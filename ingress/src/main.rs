//! Ingress binary: the single mTLS-terminating HTTPS listener serving
//! `POST /api/v1/messages`, `GET /health`, and `GET /metrics`.
//!
//! Exit codes: 0 normal, 1 fatal configuration error, 2 a
//! dependency failed at startup.

use broker_common::encryption::{EncryptionConfig, EncryptionManager};
use broker_common::logging::LoggingConfig;
use broker_common::rate_limit::{start_cleanup_task, RateLimitConfig, RateLimiter};
use broker_common::shutdown::ShutdownCoordinator;
use broker_common::tls::{load_cert_der, load_key_der, MtlsAcceptor};
use broker_ingress::config::IngressConfig;
use broker_ingress::metrics::IngressMetrics;
use broker_ingress::state::AppState;
use broker_ingress::store_client::StoreClient;
use broker_queue::Queue;
use broker_store::ca_registry::SqlCertificateRegistry;

use axum_server::tls_rustls::RustlsConfig;
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

const EXIT_OK: i32 = 0;
const EXIT_FATAL_CONFIG: i32 = 1;
const EXIT_DEPENDENCY_FAILED: i32 = 2;

fn main() {
    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    let code = runtime.block_on(run());
    std::process::exit(code);
}

async fn run() -> i32 {
    let config = match IngressConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return EXIT_FATAL_CONFIG;
        }
    };

    let logging =
        LoggingConfig { level: config.logging.level.clone(), file_path: None, json_format: config.logging.json };
    if logging.init().is_err() {
        eprintln!("failed to initialize logging");
    }

    // Read-mostly connection into the Store's database: CA registry
    // lookups, active-Client checks, and `tls.rejected` audit writes only.
    // Migrations stay the Store's responsibility; Ingress never calls
    // `migrate()` against this pool (see `config::DatabaseConfig`'s doc
    // comment).
    let db_pool = match SqlitePoolOptions::new().max_connections(8).connect(&config.database.url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("failed to connect to store database: {e}");
            return EXIT_DEPENDENCY_FAILED;
        }
    };

    let queue = match Queue::new(&config.queue.url).await {
        Ok(queue) => queue,
        Err(e) => {
            error!("failed to connect to queue database: {e}");
            return EXIT_DEPENDENCY_FAILED;
        }
    };
    if let Err(e) = queue.migrate().await {
        error!("queue migration failed: {e}");
        return EXIT_DEPENDENCY_FAILED;
    }

    let encryption = EncryptionManager::new();
    if let Err(e) = encryption
        .initialize(EncryptionConfig { key_file: Some(config.encryption.key_path.clone()), auto_generate: false })
        .await
    {
        error!("encryption manager initialization failed: {e}");
        return EXIT_DEPENDENCY_FAILED;
    }

    let ca_cert_der = match load_cert_der(&config.tls.ca_cert_path).await {
        Ok(der) => der,
        Err(e) => {
            error!("failed to load CA certificate from {:?}: {e}", config.tls.ca_cert_path);
            return EXIT_DEPENDENCY_FAILED;
        }
    };
    let cert_pem = match tokio::fs::read(&config.tls.cert_path).await {
        Ok(pem) => pem,
        Err(e) => {
            error!("failed to read ingress certificate from {:?}: {e}", config.tls.cert_path);
            return EXIT_DEPENDENCY_FAILED;
        }
    };
    let key_pem = match tokio::fs::read(&config.tls.key_path).await {
        Ok(pem) => pem,
        Err(e) => {
            error!("failed to read ingress private key from {:?}: {e}", config.tls.key_path);
            return EXIT_DEPENDENCY_FAILED;
        }
    };
    let server_cert_der = match load_cert_der(&config.tls.cert_path).await {
        Ok(der) => der,
        Err(e) => {
            error!("failed to load ingress certificate: {e}");
            return EXIT_DEPENDENCY_FAILED;
        }
    };
    let server_key_der = match load_key_der(&config.tls.key_path).await {
        Ok(der) => der,
        Err(e) => {
            error!("failed to load ingress private key: {e}");
            return EXIT_DEPENDENCY_FAILED;
        }
    };
    let ca_cert_pem = match tokio::fs::read(&config.tls.ca_cert_path).await {
        Ok(pem) => pem,
        Err(e) => {
            error!("failed to read CA certificate from {:?}: {e}", config.tls.ca_cert_path);
            return EXIT_DEPENDENCY_FAILED;
        }
    };

    let store_client = match StoreClient::new(
        config.store.internal_url.clone(),
        &ca_cert_pem,
        &cert_pem,
        &key_pem,
        Duration::from_secs(config.store.request_timeout_secs),
    ) {
        Ok(client) => client,
        Err(e) => {
            error!("failed to build Store client: {e}");
            return EXIT_FATAL_CONFIG;
        }
    };

    let tls_config = match broker_ca::verify::server_tls_config(&ca_cert_der, &server_cert_der, &server_key_der) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to build mTLS server config: {e}");
            return EXIT_FATAL_CONFIG;
        }
    };

    let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        max_requests: config.limits.rate_limit_per_minute,
        window: Duration::from_secs(60),
    }));
    start_cleanup_task(rate_limiter.clone());

    let ca_registry = Arc::new(SqlCertificateRegistry::new(db_pool.clone()));

    let state = AppState {
        db_pool,
        ca_registry,
        queue: Arc::new(queue),
        store_client: Arc::new(store_client),
        encryption: Arc::new(encryption),
        sender_hash_salt: Arc::new(config.security.sender_hash_salt.clone()),
        rate_limiter,
        metrics: Arc::new(IngressMetrics::new()),
        config: Arc::new(config.clone()),
        started_at: Instant::now(),
    };

    let router = broker_ingress::routes::router(state.clone())
        .merge(broker_ingress::health::router(state.clone()))
        .merge(metrics_router(state.clone()))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(config.limits.max_request_body_bytes))
        .layer(tower::limit::ConcurrencyLimitLayer::new(config.limits.concurrency));

    let addr: SocketAddr = match format!("{}:{}", config.server.host, config.server.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid listen address: {e}");
            return EXIT_FATAL_CONFIG;
        }
    };

    let coordinator = ShutdownCoordinator::with_timeout(Duration::from_secs(30));
    let handle = axum_server::Handle::new();
    {
        let coordinator = coordinator.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            coordinator.wait_for_signal().await;
            handle.graceful_shutdown(Some(coordinator.timeout()));
        });
    }

    info!(%addr, "ingress listening");
    let server = axum_server::bind(addr)
        .acceptor(MtlsAcceptor::new(RustlsConfig::from_config(Arc::new(tls_config))))
        .handle(handle)
        .serve(router.into_make_service());

    if let Err(e) = server.await {
        error!("ingress server error: {e}");
        return EXIT_DEPENDENCY_FAILED;
    }

    info!("shutdown complete");
    EXIT_OK
}

fn metrics_router(state: AppState) -> axum::Router {
    axum::Router::new().route("/metrics", axum::routing::get(render_metrics)).with_state(state)
}

async fn render_metrics(axum::extract::State(state): axum::extract::State<AppState>) -> String {
    let queue_length = state.queue.length().await.ok().map(|n| n.max(0) as u64);
    broker_ingress::metrics::render(&state.metrics, state.started_at, queue_length)
}
