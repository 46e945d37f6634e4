//! Worker binary entrypoint.

use broker_common::shutdown::ShutdownCoordinator;
use broker_queue::Queue;
use broker_worker::config::WorkerConfig;
use broker_worker::health::{self, HealthState};
use broker_worker::metrics::SlotMetrics;
use broker_worker::reconcile;
use broker_worker::slot::{run_slot, SlotConfig};
use broker_worker::StoreClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const EXIT_OK: i32 = 0;
const EXIT_FATAL_CONFIG: i32 = 1;
const EXIT_DEPENDENCY_FAILED: i32 = 2;
const EXIT_INVALID_CLI: i32 = 64;

fn main() {
    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    let args: Vec<String> = std::env::args().collect();
    let code = runtime.block_on(dispatch(&args));
    std::process::exit(code);
}

async fn dispatch(args: &[String]) -> i32 {
    match args.get(1).map(String::as_str) {
        None => run_worker().await,
        Some(other) => {
            eprintln!("unknown command: {other}\nusage: broker-worker");
            EXIT_INVALID_CLI
        }
    }
}

async fn run_worker() -> i32 {
    let _ = broker_common::logging::LoggingConfig::init_from_env();

    let config = match WorkerConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return EXIT_FATAL_CONFIG;
        }
    };

    let _ = broker_common::logging::LoggingConfig {
        level: config.logging.level.clone(),
        file_path: None,
        json_format: config.logging.json,
    }
    .init();

    tracing::info!("starting broker worker");

    let queue = match Queue::new(&config.queue.url).await {
        Ok(q) => q,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to queue");
            return EXIT_DEPENDENCY_FAILED;
        }
    };
    if let Err(e) = queue.migrate().await {
        tracing::error!(error = %e, "queue migration failed");
        return EXIT_DEPENDENCY_FAILED;
    }
    let queue = Arc::new(queue);

    let ca_cert_pem = match tokio::fs::read(&config.tls.ca_cert_path).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, path = %config.tls.ca_cert_path, "failed to read CA certificate");
            return EXIT_FATAL_CONFIG;
        }
    };
    let client_cert_pem = match tokio::fs::read(&config.tls.client_cert_path).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, path = %config.tls.client_cert_path, "failed to read worker certificate");
            return EXIT_FATAL_CONFIG;
        }
    };
    let client_key_pem = match tokio::fs::read(&config.tls.client_key_path).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, path = %config.tls.client_key_path, "failed to read worker private key");
            return EXIT_FATAL_CONFIG;
        }
    };

    let store = match StoreClient::new(
        config.store.internal_url.clone(),
        &ca_cert_pem,
        &client_cert_pem,
        &client_key_pem,
        Duration::from_secs(config.store.request_timeout_secs),
    ) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!(error = %e, "failed to build Store mTLS client");
            return EXIT_FATAL_CONFIG;
        }
    };

    reconcile::run(&store, &queue, config.worker.delivery_timeout_secs).await;

    let shutdown = ShutdownCoordinator::with_timeout(Duration::from_secs(config.worker.shutdown_grace_secs));
    let (health_shutdown_tx, health_shutdown_rx) = watch::channel(false);

    let slot_config = Arc::new(SlotConfig {
        pop_timeout: Duration::from_secs(config.worker.pop_timeout_secs),
        retry_interval: Duration::from_secs(config.worker.retry_interval_secs),
        max_attempts: config.worker.max_attempts,
    });

    let mut slot_handles = Vec::with_capacity(config.worker.concurrency);
    let mut slot_metrics = Vec::with_capacity(config.worker.concurrency);
    for slot_id in 0..config.worker.concurrency {
        let metrics = SlotMetrics::new();
        slot_metrics.push(Arc::clone(&metrics));
        let handle = tokio::spawn(run_slot(
            slot_id,
            Arc::clone(&queue),
            Arc::clone(&store),
            Arc::clone(&slot_config),
            metrics,
            shutdown.subscribe(),
        ));
        slot_handles.push(handle);
    }

    let health_state = HealthState { metrics: slot_metrics, started_at: std::time::Instant::now() };
    let health_addr = format!("{}:{}", config.health.host, config.health.port);
    let health_router = health::router(health_state);
    let health_task = tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&health_addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "worker health listener failed to bind; continuing without it");
                return;
            }
        };
        let mut shutdown_rx = health_shutdown_rx;
        let _ = axum::serve(listener, health_router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await;
    });

    shutdown.wait_for_signal().await;
    tracing::info!("shutdown signal received; waiting for in-flight deliveries");
    let _ = health_shutdown_tx.send(true);

    for handle in slot_handles {
        let _ = tokio::time::timeout(shutdown.timeout(), handle).await;
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), health_task).await;
    queue.close().await;

    tracing::info!("worker shutdown complete");
    EXIT_OK
}
