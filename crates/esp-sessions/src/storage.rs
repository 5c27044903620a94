//! Versioned JSON files under a `.storage/` directory

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported version for {key}: expected {expected}, found {found}")]
    VersionMismatch {
        key: String,
        expected: u32,
        found: u32,
    },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Envelope written around every stored payload
///
/// ```json
/// {
///   "version": 1,
///   "minor_version": 1,
///   "key": "espdisplay.sessions",
///   "data": { "sessions": [0, 1, 2] }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    pub version: u32,
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

impl<T> StorageFile<T> {
    pub fn new(key: impl Into<String>, data: T, version: u32, minor_version: u32) -> Self {
        Self {
            version,
            minor_version,
            key: key.into(),
            data,
        }
    }
}

/// What was found on disk for a key
#[derive(Debug, Clone, PartialEq)]
pub enum RawContent {
    /// A proper envelope; carries its version and the `data` payload
    Enveloped { version: u32, data: Value },
    /// A bare JSON document written before envelopes were introduced
    Bare(Value),
}

/// Handle to the `.storage/` directory under a base directory
#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: base_dir.as_ref().join(".storage"),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    pub async fn exists(&self, key: &str) -> bool {
        fs::try_exists(self.file_path(key)).await.unwrap_or(false)
    }

    async fn ensure_dir(&self) -> StorageResult<()> {
        if !fs::try_exists(&self.storage_dir).await.unwrap_or(false) {
            fs::create_dir_all(&self.storage_dir).await?;
            debug!("Created storage directory: {:?}", self.storage_dir);
        }
        Ok(())
    }

    /// Read a key without committing to a payload type
    ///
    /// Returns `None` when the file does not exist.
    pub async fn load_raw(&self, key: &str) -> StorageResult<Option<RawContent>> {
        let path = self.file_path(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Storage file not found: {}", key);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut value: Value = serde_json::from_str(&content)?;
        let version = value.get("version").and_then(Value::as_u64);
        let raw = match version {
            Some(version) if value.get("data").is_some() => RawContent::Enveloped {
                version: version as u32,
                data: value["data"].take(),
            },
            _ => RawContent::Bare(value),
        };
        Ok(Some(raw))
    }

    /// Load a typed envelope, rejecting an unexpected major version
    pub async fn load<T>(&self, key: &str, version: u32) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.load_raw(key).await? {
            None => Ok(None),
            Some(RawContent::Enveloped { version: found, .. }) if found != version => {
                Err(StorageError::VersionMismatch {
                    key: key.to_string(),
                    expected: version,
                    found,
                })
            }
            Some(RawContent::Enveloped { data, .. }) | Some(RawContent::Bare(data)) => {
                Ok(Some(serde_json::from_value(data)?))
            }
        }
    }

    /// Save an envelope, writing a temp file first and renaming it over the
    /// target
    pub async fn save<T>(&self, storage_file: &StorageFile<T>) -> StorageResult<()>
    where
        T: Serialize,
    {
        self.ensure_dir().await?;

        let path = self.file_path(&storage_file.key);
        let temp_path = self.file_path(&format!("{}.tmp", storage_file.key));
        let content = serde_json::to_string_pretty(storage_file)?;

        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(
            "Saved storage file: {} (v{}.{})",
            storage_file.key, storage_file.version, storage_file.minor_version
        );
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.file_path(key)).await {
            Ok(()) => {
                debug!("Deleted storage file: {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path());

        let file = StorageFile::new("test.data", json!({"a": 1}), 1, 1);
        storage.save(&file).await.unwrap();
        assert!(storage.exists("test.data").await);
        assert!(!storage.exists("test.data.tmp").await);

        let loaded: Option<Value> = storage.load("test.data", 1).await.unwrap();
        assert_eq!(loaded, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path());

        assert_eq!(storage.load_raw("nope").await.unwrap(), None);
        storage.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_bare_document_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path());
        std::fs::create_dir_all(storage.storage_dir()).unwrap();
        std::fs::write(storage.file_path("legacy"), r#"{"sessions": [1]}"#).unwrap();

        let raw = storage.load_raw("legacy").await.unwrap();
        assert_eq!(raw, Some(RawContent::Bare(json!({"sessions": [1]}))));
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path());
        storage
            .save(&StorageFile::new("test.data", json!(null), 2, 0))
            .await
            .unwrap();

        let err = storage.load::<Value>("test.data", 1).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::VersionMismatch {
                expected: 1,
                found: 2,
                ..
            }
        ));
    }
}
