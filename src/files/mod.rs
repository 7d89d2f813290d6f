//! File drop storage
//!
//! Uploaded files are written under a storage directory keyed by a random
//! hex identifier. The id is the only access credential for retrieval, so
//! it is drawn from the OS RNG. Metadata (original filename) lives in
//! memory; after a restart retrieval degrades to a directory scan.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rand::rngs::OsRng;
use rand::TryRngCore;
use thiserror::Error;
use tracing::debug;

/// File storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// No stored file for the given id
    #[error("no stored file with id {0}")]
    NotFound(String),

    /// Id contains path separators or other rejected characters
    #[error("invalid file id: {0}")]
    InvalidId(String),

    /// Disk read/write failure
    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),

    /// OS random source failure
    #[error("random id generation failed: {0}")]
    Random(String),
}

/// A stored file's location and metadata
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    pub original_name: Option<String>,
}

/// Content store for uploaded files, addressed by random id
#[derive(Clone)]
pub struct FileStore {
    dir: PathBuf,
    entries: Arc<Mutex<HashMap<String, StoredFile>>>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store file bytes under a fresh random id, returning the id
    pub async fn store(
        &self,
        original_name: Option<&str>,
        data: Bytes,
    ) -> Result<String, StorageError> {
        self.ensure_dir().await?;

        let id = random_id()?;
        let ext = original_name
            .map(extension_of)
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| ".bin".to_string());
        let path = self.dir.join(format!("{id}{ext}"));

        if let Err(e) = tokio::fs::write(&path, &data).await {
            // Drop any partially written file before surfacing the error.
            let _ = tokio::fs::remove_file(&path).await;
            return Err(StorageError::Io(e));
        }

        debug!(id = %id, path = %path.display(), bytes = data.len(), "stored file");

        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            id.clone(),
            StoredFile {
                path,
                original_name: original_name.map(str::to_owned),
            },
        );
        Ok(id)
    }

    /// Resolve an id to its stored file
    ///
    /// Falls back to scanning the storage directory when the in-memory map
    /// has no entry (process restarted since upload); in that case the
    /// original name is unknown and the storage filename stands in for it.
    pub async fn resolve(&self, id: &str) -> Result<StoredFile, StorageError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(StorageError::InvalidId(id.to_string()));
        }

        if let Some(found) = self.entries.lock().unwrap().get(id) {
            return Ok(found.clone());
        }

        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(_) => return Err(StorageError::NotFound(id.to_string())),
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let stem = name
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .unwrap_or(name.as_str());
            if stem == id {
                return Ok(StoredFile {
                    path: entry.path(),
                    original_name: Some(name),
                });
            }
        }
        Err(StorageError::NotFound(id.to_string()))
    }

    /// Read a stored file's bytes
    pub async fn read(&self, id: &str) -> Result<(Vec<u8>, String), StorageError> {
        let stored = self.resolve(id).await?;
        let bytes = tokio::fs::read(&stored.path).await?;
        let name = stored.original_name.unwrap_or_else(|| {
            stored
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| id.to_string())
        });
        Ok((bytes, name))
    }

    async fn ensure_dir(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            tokio::fs::set_permissions(&self.dir, perms).await?;
        }

        Ok(())
    }
}

/// 8 random bytes, hex-encoded. The id doubles as the retrieval
/// credential, so it must come from the OS CSPRNG.
fn random_id() -> Result<String, StorageError> {
    let mut raw = [0u8; 8];
    OsRng
        .try_fill_bytes(&mut raw)
        .map_err(|e| StorageError::Random(e.to_string()))?;
    Ok(hex::encode(raw))
}

/// Extension of a filename including the dot, or empty
fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn store_and_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let id = store
            .store(Some("notes.txt"), Bytes::from_static(b"file body"))
            .await
            .unwrap();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

        let (bytes, name) = store.read(&id).await.unwrap();
        assert_eq!(bytes, b"file body");
        assert_eq!(name, "notes.txt");
    }

    #[tokio::test]
    async fn missing_extension_defaults_to_bin() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let id = store
            .store(Some("README"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        let stored = store.resolve(&id).await.unwrap();
        assert!(stored.path.to_string_lossy().ends_with(".bin"));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let err = store.resolve("deadbeefdeadbeef").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn path_traversal_ids_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        for bad in ["../secret", "a/b", "a\\b", ""] {
            let err = store.resolve(bad).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidId(_)), "id {bad:?}");
        }
    }

    #[tokio::test]
    async fn directory_scan_survives_map_loss() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let id = store
            .store(Some("photo.png"), Bytes::from_static(b"png bytes"))
            .await
            .unwrap();

        // A fresh store over the same directory has no in-memory mapping.
        let fresh = FileStore::new(dir.path());
        let stored = fresh.resolve(&id).await.unwrap();
        assert_eq!(stored.original_name, Some(format!("{id}.png")));

        let (bytes, _) = fresh.read(&id).await.unwrap();
        assert_eq!(bytes, b"png bytes");
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let a = store.store(None, Bytes::from_static(b"a")).await.unwrap();
        let b = store.store(None, Bytes::from_static(b"b")).await.unwrap();
        assert_ne!(a, b);
    }
}
