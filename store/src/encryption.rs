//! Re-exported from `common` so Ingress can share the same
//! `EncryptionManager`/`ENCRYPTION_KEY_PATH` loading code. Kept as a module here,
//! rather than switching every `store::encryption::*` caller over to
//! `broker_common::encryption::*`, since the Store still owns the
//! decryption side of this concern (`routes::operator::list_messages`).
pub use broker_common::encryption::*;
