//! The delivery worker pool.

pub mod config;
pub mod health;
pub mod metrics;
pub mod reconcile;
pub mod slot;
pub mod store_client;

pub use config::WorkerConfig;
pub use store_client::StoreClient;
