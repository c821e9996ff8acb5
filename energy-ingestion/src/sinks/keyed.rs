use std::collections::BTreeMap;

use energy_client::{
    db::{Page, RecordQuery},
    domain::{EnergyRecord, RecordKey},
};
use time::PrimitiveDateTime;
use tokio::sync::RwLock;

use crate::pipeline::StorageError;

/// Keyed time-series store: `site_id` partitions, `timestamp` sorts.
#[async_trait::async_trait]
pub trait KeyedStore: Send + Sync {
    /// Insert or overwrite the entry at the record's composite key.
    async fn upsert(&self, record: &EnergyRecord) -> Result<(), StorageError>;

    async fn query(&self, query: &RecordQuery) -> Result<Page<EnergyRecord>, StorageError>;

    /// Unordered read across partitions.
    async fn scan(&self, limit: usize) -> Result<Vec<EnergyRecord>, StorageError>;
}

/// Ordered in-memory keyed store.
#[derive(Debug, Default)]
pub struct MemoryKeyedStore {
    entries: RwLock<BTreeMap<RecordKey, EnergyRecord>>,
}

impl MemoryKeyedStore {
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn get(&self, key: &RecordKey) -> Option<EnergyRecord> {
        self.entries.read().await.get(key).cloned()
    }
}

#[async_trait::async_trait]
impl KeyedStore for MemoryKeyedStore {
    async fn upsert(&self, record: &EnergyRecord) -> Result<(), StorageError> {
        self.entries.write().await.insert(record.key(), record.clone());
        Ok(())
    }

    async fn query(&self, query: &RecordQuery) -> Result<Page<EnergyRecord>, StorageError> {
        let limit = query.limit();
        let partition_start = RecordKey {
            site_id: query.site_id.clone(),
            timestamp: PrimitiveDateTime::MIN.assume_utc(),
        };

        let entries = self.entries.read().await;
        let rows: Vec<EnergyRecord> = entries
            .range(partition_start..)
            .take_while(|(key, _)| key.site_id == query.site_id)
            .map(|(_, record)| record)
            .filter(|record| query.matches(record))
            .take(limit + 1)
            .cloned()
            .collect();

        Ok(Page::from_overfetch(rows, limit))
    }

    async fn scan(&self, limit: usize) -> Result<Vec<EnergyRecord>, StorageError> {
        Ok(self.entries.read().await.values().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_client::db::PageToken;
    use rust_decimal::Decimal;
    use time::{macros::datetime, OffsetDateTime};

    fn record(site: &str, ts: OffsetDateTime, generated: i64) -> EnergyRecord {
        EnergyRecord {
            site_id: site.to_string(),
            timestamp: ts,
            energy_generated_kwh: Decimal::from(generated),
            energy_consumed_kwh: Decimal::ONE,
            net_energy_kwh: Decimal::from(generated - 1),
            anomaly: generated < 0,
        }
    }

    #[tokio::test]
    async fn upserting_the_same_record_twice_keeps_one_entry() {
        let store = MemoryKeyedStore::default();
        let r = record("site_alpha", datetime!(2025-06-01 12:00:00 UTC), 5);

        store.upsert(&r).await.unwrap();
        store.upsert(&r).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&r.key()).await, Some(r));
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_key() {
        let store = MemoryKeyedStore::default();
        let ts = datetime!(2025-06-01 12:00:00 UTC);
        store.upsert(&record("site_alpha", ts, 5)).await.unwrap();
        store.upsert(&record("site_alpha", ts, -3)).await.unwrap();

        let stored = store.get(&record("site_alpha", ts, 0).key()).await.unwrap();
        assert!(stored.anomaly);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn query_pages_through_one_partition_in_order() {
        let store = MemoryKeyedStore::default();
        for minute in 0..5u8 {
            let ts = datetime!(2025-06-01 12:00:00 UTC) + time::Duration::minutes(minute.into());
            store.upsert(&record("site_alpha", ts, 1)).await.unwrap();
            store.upsert(&record("site_beta", ts, 1)).await.unwrap();
        }

        let mut q = RecordQuery::for_site("site_alpha");
        q.limit = 2;

        let mut seen = Vec::new();
        loop {
            let page = store.query(&q).await.unwrap();
            assert!(page.items.iter().all(|r| r.site_id == "site_alpha"));
            seen.extend(page.items.iter().map(|r| r.timestamp));
            match page.next_token {
                Some(token) => q.after = Some(token),
                None => break,
            }
        }

        assert_eq!(seen.len(), 5);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn query_applies_range_and_anomaly_filters() {
        let store = MemoryKeyedStore::default();
        store.upsert(&record("s", datetime!(2025-06-01 00:00:00 UTC), -1)).await.unwrap();
        store.upsert(&record("s", datetime!(2025-06-02 00:00:00 UTC), 4)).await.unwrap();
        store.upsert(&record("s", datetime!(2025-06-03 00:00:00 UTC), -2)).await.unwrap();

        let mut q = RecordQuery::for_site("s");
        q.start = Some(datetime!(2025-06-02 00:00:00 UTC));
        let page = store.query(&q).await.unwrap();
        assert_eq!(page.items.len(), 2);

        q.anomalies_only = true;
        let page = store.query(&q).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].timestamp, datetime!(2025-06-03 00:00:00 UTC));

        q.after = Some(PageToken(datetime!(2025-06-03 00:00:00 UTC)));
        assert!(store.query(&q).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn scan_respects_limit() {
        let store = MemoryKeyedStore::default();
        for day in 1..=3u8 {
            let ts = datetime!(2025-06-01 00:00:00 UTC) + time::Duration::days(day.into());
            store.upsert(&record("s", ts, 1)).await.unwrap();
        }
        assert_eq!(store.scan(2).await.unwrap().len(), 2);
        assert_eq!(store.scan(10).await.unwrap().len(), 3);
    }
}
