//! Durable blob storage for landed batches.
//!
//! Objects are immutable: `put` never overwrites an existing name. Wrapping a
//! store in [`NotifyingBlobStore`] emits one [`BlobEvent`] per completed put,
//! which is what drives the ingestion trigger.

pub mod fs;
pub mod landing;
pub mod memory;

use std::sync::Arc;

use crate::pipeline::StorageError;
use crate::sources::blob_events::BlobEventSender;

pub use fs::FsBlobStore;
pub use landing::LandingWriter;
pub use memory::MemoryBlobStore;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A storage-change notification naming exactly one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEvent {
    pub object: String,
}

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Names of all stored objects, sorted.
    async fn list(&self) -> Result<Vec<String>, StorageError>;
}

/// Reject names that could escape a flat namespace or collide with temp files.
pub fn validate_object_name(name: &str) -> Result<(), StorageError> {
    let invalid = name.is_empty()
        || name.len() > 255
        || name.starts_with('.')
        || name.contains(&['/', '\\', '\0'][..])
        || name.contains("..");

    if invalid {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Blob store decorator that publishes a notification after every put.
pub struct NotifyingBlobStore {
    inner: Arc<dyn BlobStore>,
    events: BlobEventSender,
}

impl NotifyingBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>, events: BlobEventSender) -> Self {
        Self { inner, events }
    }
}

#[async_trait::async_trait]
impl BlobStore for NotifyingBlobStore {
    async fn put(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        self.inner.put(name, bytes, content_type).await?;

        // The object is durable at this point; the put reports success no
        // matter how far behind the consumer is.
        self.events.notify_detached(name);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.get(name).await
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        self.inner.list().await
    }
}
