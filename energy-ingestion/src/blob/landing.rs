use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use energy_client::domain::Reading;
use time::OffsetDateTime;

use crate::blob::{BlobStore, JSON_CONTENT_TYPE};
use crate::pipeline::{storage_timeout, PipelineError, StorageError};

const MAX_NAME_ATTEMPTS: u32 = 3;

/// Lands a batch of readings as one immutable JSON object.
///
/// Names combine nanosecond wall-clock time, a per-writer sequence number and
/// 32 random bits, so concurrent writers in the same second (or in different
/// processes) do not collide.
pub struct LandingWriter {
    store: Arc<dyn BlobStore>,
    prefix: String,
    io_timeout: Duration,
    seq: AtomicU64,
}

impl LandingWriter {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            prefix: String::new(),
            io_timeout: Duration::from_secs(10),
            seq: AtomicU64::new(0),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    fn object_name(&self) -> String {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}energy_data_{}_{:06}_{:08x}.json",
            self.prefix,
            nanos,
            seq,
            rand::random::<u32>()
        )
    }

    pub async fn write(&self, batch: &[Reading]) -> Result<String, PipelineError> {
        let body = serde_json::to_vec(batch)
            .map_err(|e| PipelineError::Storage(StorageError::Backend(format!("failed to serialize batch: {e}"))))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let name = self.object_name();
            let put = self.store.put(&name, body.clone(), JSON_CONTENT_TYPE);

            match storage_timeout("blob put", self.io_timeout, put).await {
                Ok(()) => {
                    metrics::counter!("landing_objects_written_total").increment(1);
                    metrics::counter!("landing_readings_written_total").increment(batch.len() as u64);
                    tracing::info!(object = %name, readings = batch.len(), "batch landed");
                    return Ok(name);
                }
                Err(StorageError::AlreadyExists(_)) if attempt < MAX_NAME_ATTEMPTS => {
                    tracing::warn!(object = %name, attempt, "object name collision, regenerating");
                }
                Err(e) => {
                    metrics::counter!("landing_write_errors_total").increment(1);
                    tracing::error!(object = %name, error = %e, "failed to land batch");
                    return Err(e.into());
                }
            }
        }
    }
}
