//! Scoped storage of identity signing keys
//!
//! Key records are addressed by identity id. Two implementations:
//! - [`InMemoryKeystore`] for tests and ephemeral nodes
//! - [`FileKeystore`], one JSON record per id under a directory, written
//!   atomically (temp file then rename)

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::crypto::{decode_hex, IdentitySigningKey};

/// Error type for keystore operations
#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    #[error("keystore io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt key record for {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("invalid key id: {0}")]
    InvalidId(String),
}

/// Keystore trait
///
/// Ids are identity addresses (`0x` followed by hex). Implementations must
/// never expose secret material except through [`Keystore::get_key`].
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Keystore: Send + Sync {
    /// Whether a key record exists for `id`
    async fn has_key(&self, id: &str) -> Result<bool, KeystoreError>;

    /// Load the signing key stored under `id`
    async fn get_key(&self, id: &str) -> Result<Option<IdentitySigningKey>, KeystoreError>;

    /// Store `key` under `id`, replacing any previous record
    async fn put_key(&self, id: &str, key: &IdentitySigningKey) -> Result<(), KeystoreError>;
}

/// Reject ids that could escape a keystore directory
fn validate_id(id: &str) -> Result<(), KeystoreError> {
    let hex_part = id.strip_prefix("0x").unwrap_or(id);
    if hex_part.is_empty() || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(KeystoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

// ============================================================================
// In-memory
// ============================================================================

/// In-memory keystore for development and testing
#[derive(Default)]
pub struct InMemoryKeystore {
    keys: RwLock<HashMap<String, IdentitySigningKey>>,
}

impl InMemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Keystore for InMemoryKeystore {
    async fn has_key(&self, id: &str) -> Result<bool, KeystoreError> {
        Ok(self.keys.read().await.contains_key(id))
    }

    async fn get_key(&self, id: &str) -> Result<Option<IdentitySigningKey>, KeystoreError> {
        Ok(self.keys.read().await.get(id).cloned())
    }

    async fn put_key(&self, id: &str, key: &IdentitySigningKey) -> Result<(), KeystoreError> {
        validate_id(id)?;
        self.keys.write().await.insert(id.to_string(), key.clone());
        Ok(())
    }
}

// ============================================================================
// Directory-backed
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct KeyRecord {
    id: String,
    public_key: String,
    secret_key: String,
    created_at: DateTime<Utc>,
}

/// Directory-backed keystore, one `<id>.json` file per key
pub struct FileKeystore {
    base_dir: PathBuf,
}

impl FileKeystore {
    /// Open (and create if needed) a keystore rooted at `base_dir`
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, KeystoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, KeystoreError> {
        validate_id(id)?;
        Ok(self.base_dir.join(format!("{}.json", id.to_ascii_lowercase())))
    }
}

#[async_trait::async_trait]
impl Keystore for FileKeystore {
    async fn has_key(&self, id: &str) -> Result<bool, KeystoreError> {
        let path = match self.record_path(id) {
            Ok(path) => path,
            Err(KeystoreError::InvalidId(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_key(&self, id: &str) -> Result<Option<IdentitySigningKey>, KeystoreError> {
        let path = self.record_path(id)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let corrupt = |reason: String| KeystoreError::Corrupt {
            id: id.to_string(),
            reason,
        };
        let record: KeyRecord = serde_json::from_slice(&raw).map_err(|e| corrupt(e.to_string()))?;
        let secret = decode_hex(&record.secret_key).map_err(|e| corrupt(e.to_string()))?;
        let key = IdentitySigningKey::from_slice(&secret).map_err(|e| corrupt(e.to_string()))?;

        if !key.address().eq_ignore_ascii_case(id) {
            return Err(corrupt("stored key does not match id".to_string()));
        }
        Ok(Some(key))
    }

    async fn put_key(&self, id: &str, key: &IdentitySigningKey) -> Result<(), KeystoreError> {
        let path = self.record_path(id)?;
        let record = KeyRecord {
            id: id.to_string(),
            public_key: hex::encode(key.public_key_bytes()),
            secret_key: hex::encode(key.to_bytes()),
            created_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&record).map_err(|e| KeystoreError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })?;

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &body).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        tracing::debug!(id, path = %path.display(), "Stored identity key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_memory_put_get() {
        let store = InMemoryKeystore::new();
        let key = IdentitySigningKey::generate();
        let id = key.address();

        assert!(!store.has_key(&id).await.unwrap());
        store.put_key(&id, &key).await.unwrap();
        assert!(store.has_key(&id).await.unwrap());
        let loaded = store.get_key(&id).await.unwrap().unwrap();
        assert_eq!(loaded.public_key_bytes(), key.public_key_bytes());
    }

    #[tokio::test]
    async fn test_file_keystore_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let key = IdentitySigningKey::generate();
        let id = key.address();

        FileKeystore::new(dir.path())
            .unwrap()
            .put_key(&id, &key)
            .await
            .unwrap();

        let reopened = FileKeystore::new(dir.path()).unwrap();
        assert!(reopened.has_key(&id).await.unwrap());
        let loaded = reopened.get_key(&id).await.unwrap().unwrap();
        assert_eq!(loaded.to_bytes(), key.to_bytes());
        assert!(!dir.path().join(format!("{id}.json.tmp")).exists());
    }

    #[tokio::test]
    async fn test_file_keystore_rejects_traversal_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileKeystore::new(dir.path()).unwrap();
        let key = IdentitySigningKey::generate();

        assert!(matches!(
            store.put_key("../escape", &key).await,
            Err(KeystoreError::InvalidId(_))
        ));
        assert!(!store.has_key("../escape").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_keystore_detects_mismatched_record() {
        let dir = TempDir::new().unwrap();
        let store = FileKeystore::new(dir.path()).unwrap();
        let key = IdentitySigningKey::generate();
        let other = IdentitySigningKey::generate();

        store.put_key(&other.address(), &key).await.unwrap();
        assert!(matches!(
            store.get_key(&other.address()).await,
            Err(KeystoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_keystore_missing_key() {
        let dir = TempDir::new().unwrap();
        let store = FileKeystore::new(dir.path()).unwrap();
        assert!(store.get_key("0xabcdef").await.unwrap().is_none());
    }
}
