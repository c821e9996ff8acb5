use std::{
    io::ErrorKind,
    path::PathBuf,
};

use tokio::io::AsyncWriteExt;

use crate::blob::{validate_object_name, BlobStore};
use crate::pipeline::StorageError;

/// Blob store backed by a flat directory.
///
/// Puts are written to a hidden temp file and then hard-linked into place, so a
/// reader never sees a partially written object and an existing object is never
/// replaced. The content type is not persisted; objects are JSON by convention.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub async fn open<P: Into<PathBuf>>(root: P) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to create {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    fn object_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_object_name(name)?;
        Ok(self.root.join(name))
    }
}

/// Removes a temp file when dropped, including when the put is cancelled
/// mid-write or fails before the object is published.
struct PartialFile {
    path: PathBuf,
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn backend_err(action: &str, name: &str, e: std::io::Error) -> StorageError {
    StorageError::Backend(format!("failed to {action} {name}: {e}"))
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        let path = self.object_path(name)?;
        let tmp = PartialFile {
            path: self
                .root
                .join(format!(".{name}.{}.partial", rand::random::<u64>())),
        };

        let mut file = tokio::fs::File::create(&tmp.path)
            .await
            .map_err(|e| backend_err("create", name, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| backend_err("write", name, e))?;
        file.sync_all()
            .await
            .map_err(|e| backend_err("sync", name, e))?;
        drop(file);

        let linked = tokio::fs::hard_link(&tmp.path, &path).await;
        drop(tmp);

        match linked {
            Ok(()) => {
                tracing::debug!(object = %name, content_type, bytes = bytes.len(), "blob stored");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StorageError::AlreadyExists(name.to_string())),
            Err(e) => Err(backend_err("publish", name, e)),
        }
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(name.to_string())),
            Err(e) => Err(backend_err("read", name, e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| backend_err("list", &self.root.display().to_string(), e))?;

        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| backend_err("list", &self.root.display().to_string(), e))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_object_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}
