//! Filesystem blob stores.
//!
//! Each store owns one flat directory of `<key>.<ext>` files plus a
//! `.staging/` subdirectory for in-flight writes. Blobs are staged first
//! and promoted into place with a rename, so a committed file is always
//! complete; an aborted enrollment discards its staged blob instead of
//! leaving a partial file behind.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::StoreError;

const STAGING_DIR: &str = ".staging";

/// A single-namespace blob store keyed by opaque identifier strings.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    namespace: &'static str,
    ext: &'static str,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>, namespace: &'static str, ext: &'static str) -> Self {
        Self {
            root: root.into(),
            namespace,
            ext,
        }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// Create the store directory and its staging subdirectory. Safe to
    /// call on every startup.
    pub async fn ensure_dirs(&self) -> Result<(), StoreError> {
        let staging = self.root.join(STAGING_DIR);
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| StoreError::io("create", staging, e))
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{}", self.ext))
    }

    fn staging_path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(STAGING_DIR)
            .join(format!("{key}.{}", self.ext))
    }

    /// Write bytes into the staging area under the given key.
    pub async fn stage(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.staging_path_for(key);
        fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::io("write", path, e))
    }

    /// Promote a staged blob into the committed namespace. The rename is
    /// atomic on a single filesystem.
    pub async fn commit(&self, key: &str) -> Result<(), StoreError> {
        let from = self.staging_path_for(key);
        let to = self.path_for(key);
        fs::rename(&from, &to)
            .await
            .map_err(|e| StoreError::io("rename", from, e))
    }

    /// Drop a staged blob. Missing files are fine: discard runs on
    /// failure paths where the stage step itself may not have happened.
    pub async fn discard(&self, key: &str) {
        let path = self.staging_path_for(key);
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    namespace = self.namespace,
                    key,
                    error = %e,
                    "failed to discard staged blob"
                );
            }
        }
    }

    /// Read a committed blob.
    pub async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::Missing {
                namespace: self.namespace,
                key: key.to_string(),
            }),
            Err(e) => Err(StoreError::io("read", path, e)),
        }
    }

    /// Remove a committed blob. Absence is tolerated so deleting a user
    /// whose enrollment half-failed still succeeds.
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(namespace = self.namespace, key, "blob already absent on remove");
                Ok(())
            }
            Err(e) => Err(StoreError::io("remove", path, e)),
        }
    }
}

/// Convenience constructors for the two namespaces the service uses.
impl BlobStore {
    pub fn images(data_dir: &Path) -> Self {
        Self::new(data_dir.join("images"), "images", "jpg")
    }

    pub fn signatures(data_dir: &Path) -> Self {
        Self::new(data_dir.join("signatures"), "signatures", "sig")
    }
}
