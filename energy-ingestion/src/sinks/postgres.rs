use energy_client::{
    db::{energy_record_queries, Page, RecordQuery},
    domain::EnergyRecord,
};
use sqlx::postgres::PgPool;

use crate::pipeline::StorageError;
use crate::sinks::KeyedStore;

/// Keyed store on a PostgreSQL table keyed by `(site_id, ts)`.
pub struct PostgresKeyedStore {
    pool: PgPool,
}

impl PostgresKeyedStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        energy_record_queries::ensure_schema(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }
}

#[async_trait::async_trait]
impl KeyedStore for PostgresKeyedStore {
    async fn upsert(&self, record: &EnergyRecord) -> Result<(), StorageError> {
        energy_record_queries::upsert_record(&self.pool, record)
            .await
            .map_err(|e| {
                metrics::counter!("postgres_upsert_errors_total").increment(1);
                StorageError::Backend(e.to_string())
            })
    }

    async fn query(&self, query: &RecordQuery) -> Result<Page<EnergyRecord>, StorageError> {
        energy_record_queries::records_page(&self.pool, query)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn scan(&self, limit: usize) -> Result<Vec<EnergyRecord>, StorageError> {
        energy_record_queries::scan_records(&self.pool, limit)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }
}
