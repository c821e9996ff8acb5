use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use energy_client::db::RecordQuery;
use energy_ingestion::{
    blob::{BlobStore, FsBlobStore, LandingWriter, MemoryBlobStore, NotifyingBlobStore, JSON_CONTENT_TYPE},
    pipeline::PipelineError,
    sinks::{AlertPublisher, KeyedStore, MemoryKeyedStore, Notifier, RecordWriter},
    sources::{BlobEventSource, Generator, LandedObjectsSource},
    trigger::{IngestionTrigger, TriggerSettings},
};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CapturingNotifier {
    messages: StdMutex<Vec<(String, String)>>,
}

impl CapturingNotifier {
    fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Notifier for CapturingNotifier {
    async fn publish(&self, subject: &str, message: &str) -> Result<(), PipelineError> {
        self.messages
            .lock()
            .unwrap()
            .push((subject.to_string(), message.to_string()));
        Ok(())
    }
}

fn settings() -> TriggerSettings {
    TriggerSettings {
        retry_backoff: Duration::from_millis(1),
        ..TriggerSettings::default()
    }
}

fn trigger_with(
    blobs: Arc<dyn BlobStore>,
    store: Arc<MemoryKeyedStore>,
    notifier: Arc<CapturingNotifier>,
    settings: TriggerSettings,
) -> IngestionTrigger {
    let io = Duration::from_secs(1);
    IngestionTrigger::new(
        blobs,
        RecordWriter::new(store, io),
        AlertPublisher::new(notifier, "Energy Anomaly Alert", io),
        settings,
    )
}

fn trigger_for(
    blobs: Arc<dyn BlobStore>,
    store: Arc<MemoryKeyedStore>,
    notifier: Arc<CapturingNotifier>,
) -> IngestionTrigger {
    trigger_with(blobs, store, notifier, settings())
}

#[tokio::test]
async fn single_site_batch_flows_from_generator_to_store_and_alerts() {
    let landed = Arc::new(MemoryBlobStore::default());
    let (events, source) = BlobEventSource::channel(16);
    let landing = LandingWriter::new(Arc::new(NotifyingBlobStore::new(landed.clone(), events)));

    let readings = Generator::with_seed(42)
        .generate(2, &["site_alpha".to_string()])
        .unwrap();
    assert_eq!(readings.len(), 2);
    let object = landing.write(&readings).await.unwrap();
    drop(landing);

    let store = Arc::new(MemoryKeyedStore::default());
    let notifier = Arc::new(CapturingNotifier::default());
    let summary = trigger_for(landed.clone(), store.clone(), notifier.clone())
        .run(&source, CancellationToken::new())
        .await;

    assert_eq!(landed.list().await.unwrap(), vec![object]);
    assert_eq!(summary.events, 1);
    assert_eq!(summary.records_persisted, 2);

    let page = store.query(&RecordQuery::for_site("site_alpha")).await.unwrap();
    assert_eq!(page.items.len(), 2);
    assert!(page.items[0].timestamp < page.items[1].timestamp);
    for (record, reading) in page.items.iter().zip(&readings) {
        assert_eq!(record.timestamp, reading.timestamp);
        assert_eq!(
            record.net_energy_kwh,
            reading.energy_generated_kwh - reading.energy_consumed_kwh
        );
    }

    let anomalous = readings
        .iter()
        .filter(|r| r.energy_generated_kwh < Decimal::ZERO || r.energy_consumed_kwh < Decimal::ZERO)
        .count();
    let alerts = notifier.messages();
    assert_eq!(alerts.len(), anomalous);
    assert_eq!(summary.alerts_sent, anomalous);
    for (subject, message) in alerts {
        assert_eq!(subject, "Energy Anomaly Alert");
        assert!(message.starts_with("Anomaly Detected!\nSite: site_alpha\n"));
    }
}

#[tokio::test]
async fn redelivered_notification_does_not_duplicate_alerts() {
    let landed = Arc::new(MemoryBlobStore::default());
    landed
        .put(
            "energy_data_1.json",
            br#"[{"site_id":"site_gamma","timestamp":"2025-06-01T12:00:00Z","energy_generated_kwh":-5.0,"energy_consumed_kwh":20.0}]"#.to_vec(),
            JSON_CONTENT_TYPE,
        )
        .await
        .unwrap();

    let (events, source) = BlobEventSource::channel(4);
    events.notify("energy_data_1.json").await.unwrap();
    events.notify("energy_data_1.json").await.unwrap();
    drop(events);

    let store = Arc::new(MemoryKeyedStore::default());
    let notifier = Arc::new(CapturingNotifier::default());
    // One event per invocation, so the redelivery arrives after the first
    // delivery has completed.
    let t = trigger_with(
        landed,
        store.clone(),
        notifier.clone(),
        TriggerSettings {
            invocation_size: 1,
            ..settings()
        },
    );
    let summary = t.run(&source, CancellationToken::new()).await;

    assert_eq!(store.len().await, 1);
    assert_eq!(notifier.messages().len(), 1);
    assert_eq!(summary.duplicates, 1);
}

#[tokio::test]
async fn bad_objects_fail_alone_within_a_run() {
    let landed = Arc::new(MemoryBlobStore::default());
    landed
        .put("a_broken.json", b"{not json".to_vec(), JSON_CONTENT_TYPE)
        .await
        .unwrap();
    landed
        .put(
            "b_mixed.json",
            br#"[
                {"site_id":"site_beta","timestamp":"2025-06-01T12:00:00Z","energy_generated_kwh":4.5,"energy_consumed_kwh":1.25},
                {"site_id":"site_beta","timestamp":"2025-06-01T12:01:00Z","energy_generated_kwh":"lots","energy_consumed_kwh":1.0},
                {"site_id":"site_beta","timestamp":"2025-06-01T12:02:00Z","energy_generated_kwh":3.0,"energy_consumed_kwh":1.0}
            ]"#
            .to_vec(),
            JSON_CONTENT_TYPE,
        )
        .await
        .unwrap();

    let store = Arc::new(MemoryKeyedStore::default());
    let t = trigger_for(landed.clone(), store.clone(), Arc::new(CapturingNotifier::default()));
    let summary = t
        .run(&LandedObjectsSource::new(landed), CancellationToken::new())
        .await;

    assert_eq!(summary.parse_failures, 1);
    assert_eq!(summary.records_persisted, 2);
    assert_eq!(summary.records_failed, 1);
    assert_eq!(summary.abandoned_events, 0);
    assert_eq!(store.len().await, 2);

    let first = store.query(&RecordQuery::for_site("site_beta")).await.unwrap().items[0].clone();
    assert_eq!(first.net_energy_kwh, Decimal::new(325, 2));
}

#[tokio::test]
async fn replaying_a_filesystem_landing_zone_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let fs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::open(dir.path()).await.unwrap());
    let landing = LandingWriter::new(fs.clone());
    let mut generator = Generator::with_seed(7);
    let sites = vec!["site_alpha".to_string(), "site_beta".to_string()];
    for _ in 0..3 {
        let batch = generator.generate(4, &sites).unwrap();
        landing.write(&batch).await.unwrap();
    }

    let store = Arc::new(MemoryKeyedStore::default());
    for _ in 0..2 {
        // A fresh trigger each pass: no dedup memory, so every object is reprocessed.
        let t = trigger_for(fs.clone(), store.clone(), Arc::new(CapturingNotifier::default()));
        let summary = t
            .run(&LandedObjectsSource::new(fs.clone()), CancellationToken::new())
            .await;
        assert_eq!(summary.events, 3);
        assert_eq!(summary.records_persisted, 24);
        assert_eq!(store.len().await, 24);
    }
}
