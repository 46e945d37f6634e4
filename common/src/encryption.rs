//! Body encryption at rest: AES-256-GCM, key loaded from a file
//! rather than generated in-process, since the Store of record must
//! survive a restart without losing the ability to decrypt.
//!
//! Lives in `common` (not `store`) because Ingress also encrypts message
//! bodies before it ever calls the Store's `RegisterMessage`
//! — both binaries need the same `EncryptionManager` loaded from the same
//! `ENCRYPTION_KEY_PATH` file.
//!
//! Each ciphertext carries a `key_id` byte so an operator can rotate the
//! encryption key by appending a new line to the key file: old rows stay
//! decryptable under their original key, and all new writes use the
//! newest one.

use crate::{Error, Result};
use base64::Engine;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    /// Path to a key file: one `<key_id>:<hex-encoded 32-byte key>` per
    /// line. The highest `key_id` is used for new encryptions.
    pub key_file: Option<String>,
    /// Generate an ephemeral single-generation key instead of loading a
    /// file. Only appropriate for tests and local development.
    pub auto_generate: bool,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self { key_file: None, auto_generate: false }
    }
}

struct Keys {
    by_id: HashMap<u8, [u8; KEY_SIZE]>,
    current_id: u8,
}

pub struct EncryptionManager {
    keys: Arc<RwLock<Option<Keys>>>,
}

impl EncryptionManager {
    pub fn new() -> Self {
        Self { keys: Arc::new(RwLock::new(None)) }
    }

    pub async fn initialize(&self, config: EncryptionConfig) -> Result<()> {
        let keys = if let Some(ref key_file) = config.key_file {
            Self::load_keys_from_file(key_file).await?
        } else if config.auto_generate {
            let mut by_id = HashMap::new();
            by_id.insert(1u8, Self::generate_key());
            Keys { by_id, current_id: 1 }
        } else {
            return Err(Error::Fatal("no encryption key configured (set ENCRYPTION_KEY_PATH)".to_string()));
        };

        *self.keys.write().await = Some(keys);
        tracing::info!("encryption manager initialized");
        Ok(())
    }

    pub async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let guard = self.keys.read().await;
        let keys = guard.as_ref().ok_or_else(|| Error::Internal("encryption not initialized".to_string()))?;
        let key = keys.by_id.get(&keys.current_id).expect("current_id always present");
        Self::encrypt_with_key(key, keys.current_id, plaintext)
    }

    pub async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE + 1 + TAG_SIZE {
            return Err(Error::InvalidBody("ciphertext too short".to_string()));
        }
        let key_id = ciphertext[NONCE_SIZE];
        let guard = self.keys.read().await;
        let keys = guard.as_ref().ok_or_else(|| Error::Internal("encryption not initialized".to_string()))?;
        let key = keys
            .by_id
            .get(&key_id)
            .ok_or_else(|| Error::Internal(format!("no key for key_id {key_id}; was the key file truncated?")))?;
        Self::decrypt_with_key(key, ciphertext)
    }

    pub async fn encrypt_string(&self, plaintext: &str) -> Result<String> {
        let encrypted = self.encrypt(plaintext.as_bytes()).await?;
        Ok(base64::engine::general_purpose::STANDARD.encode(encrypted))
    }

    pub async fn decrypt_string(&self, ciphertext: &str) -> Result<String> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|e| Error::InvalidBody(format!("base64 decode failed: {e}")))?;
        let decrypted = self.decrypt(&decoded).await?;
        String::from_utf8(decrypted).map_err(|e| Error::InvalidBody(format!("utf-8 decode failed: {e}")))
    }

    pub async fn is_available(&self) -> bool {
        self.keys.read().await.is_some()
    }

    pub fn generate_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill(&mut key);
        key
    }

    pub fn generate_key_hex() -> String {
        hex::encode(Self::generate_key())
    }

    async fn load_keys_from_file(path: &str) -> Result<Keys> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Fatal(format!("failed to read encryption key file {path}: {e}")))?;

        let mut by_id = HashMap::new();
        let mut current_id = 0u8;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (id_str, hex_key) = line
                .split_once(':')
                .ok_or_else(|| Error::Fatal(format!("malformed key file line: {line}")))?;
            let id: u8 = id_str
                .trim()
                .parse()
                .map_err(|_| Error::Fatal(format!("invalid key_id in key file: {id_str}")))?;
            let key = Self::decode_hex_key(hex_key.trim())?;
            by_id.insert(id, key);
            current_id = current_id.max(id);
        }

        if by_id.is_empty() {
            return Err(Error::Fatal(format!("{path} contains no encryption keys")));
        }
        Ok(Keys { by_id, current_id })
    }

    fn decode_hex_key(hex_key: &str) -> Result<[u8; KEY_SIZE]> {
        let bytes = hex::decode(hex_key).map_err(|e| Error::Fatal(format!("invalid hex key: {e}")))?;
        if bytes.len() != KEY_SIZE {
            return Err(Error::Fatal(format!("key must be {KEY_SIZE} bytes (got {})", bytes.len())));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        Ok(key)
    }

    fn encrypt_with_key(key: &[u8; KEY_SIZE], key_id: u8, plaintext: &[u8]) -> Result<Vec<u8>> {
        use aes_gcm::{
            aead::{Aead, KeyInit},
            Aes256Gcm, Nonce,
        };

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::Internal(format!("failed to create cipher: {e}")))?;
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::Internal(format!("encryption failed: {e}")))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + 1 + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.push(key_id);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn decrypt_with_key(key: &[u8; KEY_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
        use aes_gcm::{
            aead::{Aead, KeyInit},
            Aes256Gcm, Nonce,
        };

        let nonce = Nonce::from_slice(&ciphertext[..NONCE_SIZE]);
        let encrypted_data = &ciphertext[NONCE_SIZE + 1..];

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::Internal(format!("failed to create cipher: {e}")))?;
        cipher
            .decrypt(nonce, encrypted_data)
            .map_err(|e| Error::InvalidBody(format!("decryption failed: {e}")))
    }
}

impl Default for EncryptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn auto_manager() -> EncryptionManager {
        let manager = EncryptionManager::new();
        manager.initialize(EncryptionConfig { key_file: None, auto_generate: true }).await.unwrap();
        manager
    }

    #[test]
    fn key_generation_produces_distinct_keys() {
        assert_ne!(EncryptionManager::generate_key(), EncryptionManager::generate_key());
    }

    #[tokio::test]
    async fn encryption_roundtrips() {
        let manager = auto_manager().await;
        let plaintext = b"Hello, this is a message body.";
        let ciphertext = manager.encrypt(plaintext).await.unwrap();
        let decrypted = manager.decrypt(&ciphertext).await.unwrap();
        assert_eq!(plaintext.to_vec(), decrypted);
    }

    #[tokio::test]
    async fn string_roundtrips_through_base64() {
        let manager = auto_manager().await;
        let plaintext = "Sensitive payload";
        let encrypted = manager.encrypt_string(plaintext).await.unwrap();
        assert_eq!(plaintext, manager.decrypt_string(&encrypted).await.unwrap());
    }

    #[tokio::test]
    async fn same_plaintext_yields_different_ciphertexts() {
        let manager = auto_manager().await;
        let ct1 = manager.encrypt_string("same message").await.unwrap();
        let ct2 = manager.encrypt_string("same message").await.unwrap();
        assert_ne!(ct1, ct2);
    }

    #[tokio::test]
    async fn key_rotation_keeps_old_ciphertexts_decryptable() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let key1 = EncryptionManager::generate_key_hex();
        writeln!(file, "1:{key1}").unwrap();

        let manager_v1 = EncryptionManager::new();
        manager_v1
            .initialize(EncryptionConfig { key_file: Some(file.path().to_str().unwrap().to_string()), auto_generate: false })
            .await
            .unwrap();
        let old_ciphertext = manager_v1.encrypt_string("written before rotation").await.unwrap();

        let key2 = EncryptionManager::generate_key_hex();
        writeln!(file, "2:{key2}").unwrap();

        let manager_v2 = EncryptionManager::new();
        manager_v2
            .initialize(EncryptionConfig { key_file: Some(file.path().to_str().unwrap().to_string()), auto_generate: false })
            .await
            .unwrap();

        assert_eq!(manager_v2.decrypt_string(&old_ciphertext).await.unwrap(), "written before rotation");
        let new_ciphertext = manager_v2.encrypt_string("written after rotation").await.unwrap();
        assert_eq!(manager_v2.decrypt_string(&new_ciphertext).await.unwrap(), "written after rotation");
    }

    #[tokio::test]
    async fn wrong_key_fails_to_decrypt() {
        let manager1 = auto_manager().await;
        let manager2 = auto_manager().await;
        let encrypted = manager1.encrypt_string("secret").await.unwrap();
        assert!(manager2.decrypt_string(&encrypted).await.is_err());
    }

    #[tokio::test]
    async fn too_short_ciphertext_is_rejected() {
        let manager = auto_manager().await;
        assert!(manager.decrypt(&[0u8; 5]).await.is_err());
    }
}
