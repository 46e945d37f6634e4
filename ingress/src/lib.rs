//! Ingress: the mTLS-terminating public submission endpoint.

pub mod ca_verify;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod store_client;

pub use state::AppState;
