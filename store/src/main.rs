//! Store binary: the process of record. Serves two HTTPS listeners —
//! an internal mTLS API for Ingress/Worker, and an operator bearer-token
//! API — plus a `init-ca` one-shot subcommand that bootstraps the system's
//! Certificate Authority before the server can start for the first time.
//!
//! Exit codes: 0 normal, 1 fatal configuration error, 2 a dependency
//! failed at startup, 64 invalid command-line usage.

use broker_ca::authority::DEFAULT_CA_VALIDITY_DAYS;
use broker_ca::CertificateAuthority;
use broker_common::logging::LoggingConfig;
use broker_common::rate_limit::{RateLimitConfig, RateLimiter};
use broker_common::shutdown::ShutdownCoordinator;
use broker_common::tls::{load_cert_der, load_key_der, MtlsAcceptor};
use broker_store::ca_registry::SqlCertificateRegistry;
use broker_store::config::StoreConfig;
use broker_store::db::Database;
use broker_store::encryption::{EncryptionConfig, EncryptionManager};
use broker_store::health::HealthChecker;
use broker_store::routes;
use broker_store::state::AppState;
use broker_store::tokens::TokenIssuer;

use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const EXIT_OK: i32 = 0;
const EXIT_FATAL_CONFIG: i32 = 1;
const EXIT_DEPENDENCY_FAILED: i32 = 2;
const EXIT_INVALID_CLI: i32 = 64;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    let code = runtime.block_on(dispatch(args));
    std::process::exit(code);
}

async fn dispatch(args: Vec<String>) -> i32 {
    match args.first().map(String::as_str) {
        None => run_server().await,
        Some("init-ca") => run_init_ca(&args[1..]).await,
        Some(other) => {
            eprintln!(
                "unknown subcommand '{other}'\nusage: broker-store [init-ca --cn <common-name> [--validity-days <n>]]"
            );
            EXIT_INVALID_CLI
        }
    }
}

/// One-shot CA bootstrap: generates the root key pair, self-signs the CA
/// certificate, records it in the store, and writes the PEM material to
/// the paths the server will read at every subsequent startup.
async fn run_init_ca(args: &[String]) -> i32 {
    let mut cn: Option<String> = None;
    let mut validity_days = DEFAULT_CA_VALIDITY_DAYS;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--cn" => {
                i += 1;
                match args.get(i) {
                    Some(v) => cn = Some(v.clone()),
                    None => {
                        eprintln!("--cn requires a value");
                        return EXIT_INVALID_CLI;
                    }
                }
            }
            "--validity-days" => {
                i += 1;
                match args.get(i).and_then(|v| v.parse().ok()) {
                    Some(v) => validity_days = v,
                    None => {
                        eprintln!("--validity-days requires an integer value");
                        return EXIT_INVALID_CLI;
                    }
                }
            }
            other => {
                eprintln!("unrecognized flag '{other}'");
                return EXIT_INVALID_CLI;
            }
        }
        i += 1;
    }

    let Some(cn) = cn else {
        eprintln!("--cn is required, e.g. init-ca --cn 'broker-root-ca'");
        return EXIT_INVALID_CLI;
    };

    let _ = LoggingConfig::init_from_env();
    let config = StoreConfig::load();

    let db = match Database::new(&config.database.url).await {
        Ok(db) => db,
        Err(e) => {
            error!("failed to connect to database: {e}");
            return EXIT_DEPENDENCY_FAILED;
        }
    };
    if let Err(e) = db.migrate().await {
        error!("failed to run database migrations: {e}");
        return EXIT_DEPENDENCY_FAILED;
    }

    let registry = Arc::new(SqlCertificateRegistry::new(db.pool().clone()));
    let (_authority, issued) = match CertificateAuthority::initialize(registry, &cn, validity_days).await {
        Ok(pair) => pair,
        Err(e) => {
            error!("CA initialization failed: {e}");
            return EXIT_FATAL_CONFIG;
        }
    };

    if let Err(e) = tokio::fs::write(&config.tls.ca_cert_path, &issued.cert_pem).await {
        error!("failed to write CA certificate to {:?}: {e}", config.tls.ca_cert_path);
        return EXIT_DEPENDENCY_FAILED;
    }
    if let Err(e) = tokio::fs::write(&config.tls.ca_key_path, &issued.key_pem).await {
        error!("failed to write CA private key to {:?}: {e}", config.tls.ca_key_path);
        return EXIT_DEPENDENCY_FAILED;
    }

    info!(cn = %cn, serial = %issued.serial, "CA initialized");
    println!("CA initialized: cn={cn} serial={}", issued.serial);
    println!("cert: {:?}", config.tls.ca_cert_path);
    println!("key:  {:?}", config.tls.ca_key_path);
    EXIT_OK
}

async fn run_server() -> i32 {
    let config = StoreConfig::load();
    if let Err(e) = config.validate() {
        eprintln!("configuration error: {e}");
        return EXIT_FATAL_CONFIG;
    }

    let logging = LoggingConfig {
        level: config.logging.level.clone(),
        file_path: None,
        json_format: config.logging.json,
    };
    if logging.init().is_err() {
        eprintln!("failed to initialize logging");
    }

    let db = match Database::new(&config.database.url).await {
        Ok(db) => db,
        Err(e) => {
            error!("database connection failed: {e}");
            return EXIT_DEPENDENCY_FAILED;
        }
    };
    if let Err(e) = db.migrate().await {
        error!("database migration failed: {e}");
        return EXIT_DEPENDENCY_FAILED;
    }

    let encryption = EncryptionManager::new();
    let enc_result = encryption
        .initialize(EncryptionConfig {
            key_file: Some(config.encryption.key_path.display().to_string()),
            auto_generate: false,
        })
        .await;
    if let Err(e) = enc_result {
        error!("encryption manager initialization failed: {e}");
        return EXIT_DEPENDENCY_FAILED;
    }

    let registry = Arc::new(SqlCertificateRegistry::new(db.pool().clone()));
    let active_ca = match broker_ca::CertificateRegistry::active_ca(registry.as_ref()).await {
        Ok(Some(cert)) => cert,
        Ok(None) => {
            error!("no active CA found; run 'broker-store init-ca --cn <name>' first");
            return EXIT_DEPENDENCY_FAILED;
        }
        Err(e) => {
            error!("failed to look up active CA: {e}");
            return EXIT_DEPENDENCY_FAILED;
        }
    };

    let ca_cert_der = match load_cert_der(&config.tls.ca_cert_path).await {
        Ok(der) => der,
        Err(e) => {
            error!("failed to load CA certificate from {:?}: {e}", config.tls.ca_cert_path);
            return EXIT_DEPENDENCY_FAILED;
        }
    };
    let ca_key_der = match load_key_der(&config.tls.ca_key_path).await {
        Ok(der) => der,
        Err(e) => {
            error!("failed to load CA private key from {:?}: {e}", config.tls.ca_key_path);
            return EXIT_DEPENDENCY_FAILED;
        }
    };

    let ca = match CertificateAuthority::load(
        registry,
        ca_cert_der.clone(),
        ca_key_der,
        active_ca.serial.clone(),
        active_ca.subject_cn.clone(),
    ) {
        Ok(ca) => ca,
        Err(e) => {
            error!("failed to reconstruct certificate authority: {e}");
            return EXIT_FATAL_CONFIG;
        }
    };

    let server_cert_der = match load_cert_der(&config.tls.server_cert_path).await {
        Ok(der) => der,
        Err(e) => {
            error!("failed to load server certificate: {e}");
            return EXIT_DEPENDENCY_FAILED;
        }
    };
    let server_key_der = match load_key_der(&config.tls.server_key_path).await {
        Ok(der) => der,
        Err(e) => {
            error!("failed to load server private key: {e}");
            return EXIT_DEPENDENCY_FAILED;
        }
    };
    let operator_cert_der = match load_cert_der(&config.tls.operator_cert_path).await {
        Ok(der) => der,
        Err(e) => {
            error!("failed to load operator certificate: {e}");
            return EXIT_DEPENDENCY_FAILED;
        }
    };
    let operator_key_der = match load_key_der(&config.tls.operator_key_path).await {
        Ok(der) => der,
        Err(e) => {
            error!("failed to load operator private key: {e}");
            return EXIT_DEPENDENCY_FAILED;
        }
    };

    let internal_tls = match broker_ca::verify::server_tls_config(&ca_cert_der, &server_cert_der, &server_key_der) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to build internal TLS config: {e}");
            return EXIT_FATAL_CONFIG;
        }
    };
    let operator_tls = match build_server_only_tls_config(&operator_cert_der, &operator_key_der) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to build operator TLS config: {e}");
            return EXIT_FATAL_CONFIG;
        }
    };

    let tokens = Arc::new(TokenIssuer::new(
        config.security.jwt_secret.clone(),
        config.security.access_token_minutes,
        config.security.refresh_token_days,
    ));
    let operator_rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
    broker_common::rate_limit::start_cleanup_task(operator_rate_limiter.clone());
    let health = Arc::new(HealthChecker::new(env!("CARGO_PKG_VERSION")));

    let state = AppState {
        db: Arc::new(db),
        encryption: Arc::new(encryption),
        ca: Arc::new(ca),
        tokens,
        operator_rate_limiter,
        config: Arc::new(config.clone()),
        health,
    };

    let internal_router = routes::internal::router(state.clone()).merge(routes::health_router(state.clone()));
    let operator_router = routes::operator::router(state.clone()).merge(routes::health_router(state.clone()));

    let internal_addr: SocketAddr = match format!("{}:{}", config.server.internal_host, config.server.internal_port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid internal listen address: {e}");
            return EXIT_FATAL_CONFIG;
        }
    };
    let operator_addr: SocketAddr = match format!("{}:{}", config.server.operator_host, config.server.operator_port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid operator listen address: {e}");
            return EXIT_FATAL_CONFIG;
        }
    };

    let coordinator = ShutdownCoordinator::with_timeout(Duration::from_secs(30));
    let internal_handle = axum_server::Handle::new();
    let operator_handle = axum_server::Handle::new();

    {
        let coordinator = coordinator.clone();
        let internal_handle = internal_handle.clone();
        let operator_handle = operator_handle.clone();
        tokio::spawn(async move {
            coordinator.wait_for_signal().await;
            let grace = coordinator.timeout();
            internal_handle.graceful_shutdown(Some(grace));
            operator_handle.graceful_shutdown(Some(grace));
        });
    }

    info!(addr = %internal_addr, "internal mTLS API listening");
    let internal_server = axum_server::bind(internal_addr)
        .acceptor(MtlsAcceptor::new(RustlsConfig::from_config(Arc::new(internal_tls))))
        .handle(internal_handle)
        .serve(internal_router.into_make_service());

    info!(addr = %operator_addr, "operator API listening");
    let operator_server = axum_server::bind(operator_addr)
        .acceptor(RustlsAcceptor::new(RustlsConfig::from_config(Arc::new(operator_tls))))
        .handle(operator_handle)
        .serve(operator_router.into_make_service());

    let (internal_result, operator_result) = tokio::join!(internal_server, operator_server);
    if let Err(e) = internal_result {
        error!("internal API server error: {e}");
        return EXIT_DEPENDENCY_FAILED;
    }
    if let Err(e) = operator_result {
        error!("operator API server error: {e}");
        return EXIT_DEPENDENCY_FAILED;
    }

    info!("shutdown complete");
    EXIT_OK
}

/// The operator API is bearer-token gated, not mTLS — clients present no
/// certificate, so this config accepts any client handshake.
fn build_server_only_tls_config(cert_der: &[u8], key_der: &[u8]) -> broker_common::Result<rustls::ServerConfig> {
    let cert_chain = vec![rustls::pki_types::CertificateDer::from(cert_der.to_vec())];
    let key = rustls::pki_types::PrivateKeyDer::Pkcs8(rustls::pki_types::PrivatePkcs8KeyDer::from(key_der.to_vec()));
    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| broker_common::Error::Internal(format!("failed to build operator TLS config: {e}")))
}
