use std::{sync::Arc, time::Duration};

use energy_client::domain::EnergyRecord;

use crate::pipeline::{storage_timeout, StorageError};
use crate::sinks::KeyedStore;

/// Idempotent, time-bounded upsert of transformed records.
///
/// Retrying is left to the invocation boundary; a failed upsert is reported to
/// the caller once.
#[derive(Clone)]
pub struct RecordWriter {
    store: Arc<dyn KeyedStore>,
    io_timeout: Duration,
}

impl RecordWriter {
    pub fn new(store: Arc<dyn KeyedStore>, io_timeout: Duration) -> Self {
        Self { store, io_timeout }
    }

    pub async fn upsert(&self, record: &EnergyRecord) -> Result<(), StorageError> {
        match storage_timeout("keyed upsert", self.io_timeout, self.store.upsert(record)).await {
            Ok(()) => {
                metrics::counter!("records_persisted_total").increment(1);
                tracing::debug!(site_id = %record.site_id, key = %record.key(), "record persisted");
                Ok(())
            }
            Err(e) => {
                metrics::counter!("record_persist_errors_total").increment(1);
                tracing::error!(key = %record.key(), error = %e, "record upsert failed");
                Err(e)
            }
        }
    }
}
