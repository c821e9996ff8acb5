use std::{future::Future, pin::Pin, time::Duration, time::SystemTime};

use energy_client::domain::ValidationError;
use futures::Stream;

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn now(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("object or entry not found: {0}")]
    NotFound(String),
    #[error("object already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid object name: {0}")]
    InvalidName(String),
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Transient failures worth re-invoking; everything else needs a human.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Backend(_))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("notification error: {0}")]
    Notification(String),
    #[error("source error: {0}")]
    Source(String),
}

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(
        &self,
    ) -> Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

/// Bound a storage call; a call that outlives `after` is reported as failed.
pub async fn storage_timeout<T, F>(op: &'static str, after: Duration, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(res) => res,
        Err(_) => Err(StorageError::Timeout { op, after }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_timeout_reports_hung_calls() {
        let res: Result<(), StorageError> = storage_timeout("blob get", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(res, Err(StorageError::Timeout { op: "blob get", .. })));
        assert!(res.unwrap_err().is_retryable());
    }

    #[test]
    fn only_transient_storage_errors_are_retryable() {
        assert!(StorageError::Backend("connection reset".into()).is_retryable());
        assert!(!StorageError::NotFound("x.json".into()).is_retryable());
        assert!(!StorageError::AlreadyExists("x.json".into()).is_retryable());
        assert!(!StorageError::InvalidName("../x".into()).is_retryable());
    }
}
