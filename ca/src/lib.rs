//! Certificate Authority / Trust component.
//!
//! A single logical CA issues, signs, revokes, and verifies certificates for
//! clients and internal components (proxy/worker/server). Persistence of
//! `Certificate` rows is delegated to a [`registry::CertificateRegistry`]
//! implementation supplied by the caller (the `store` crate backs it with
//! `sqlx`/SQLite) — this crate owns the cryptographic operations only.

pub mod authority;
pub mod crl;
pub mod keys;
pub mod registry;
pub mod verify;

pub use authority::{CertificateAuthority, IssuedCertificate};
pub use registry::CertificateRegistry;
