//! Storage-triggered ingestion.
//!
//! Each blob notification names one landed object. The trigger fetches it,
//! parses the JSON array, and runs every entry through transform, upsert and
//! (for anomalies) alerting. Failures are isolated per entry and per object;
//! the only thing that escalates is a transient storage failure, which
//! re-invokes the affected events with linear backoff.

mod dedup;
mod report;

use std::{sync::Arc, time::Duration, time::SystemTime};

use futures::{stream, StreamExt};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::blob::{BlobEvent, BlobStore};
use crate::pipeline::{storage_timeout, Envelope, PipelineError, Source, Transform};
use crate::sinks::{AlertPublisher, RecordWriter};
use crate::transform::EnergyTransform;

use dedup::RecentObjects;
pub use report::{
    AlertStatus, EventOutcome, EventReport, InvocationReport, RecordOutcome, RecordReport, RunSummary,
};

#[derive(Debug, Clone)]
pub struct TriggerSettings {
    /// Bound on every blob fetch.
    pub io_timeout: Duration,
    /// Objects handled concurrently within one invocation.
    pub event_concurrency: usize,
    /// Entries of one object handled concurrently.
    pub record_concurrency: usize,
    /// Upper bound on events delivered to a single invocation.
    pub invocation_size: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Completed objects remembered for duplicate suppression; 0 disables.
    pub dedup_capacity: usize,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(10),
            event_concurrency: 4,
            record_concurrency: 16,
            invocation_size: 32,
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            dedup_capacity: 4096,
        }
    }
}

pub struct IngestionTrigger {
    blobs: Arc<dyn BlobStore>,
    writer: RecordWriter,
    alerts: AlertPublisher,
    transform: EnergyTransform,
    settings: TriggerSettings,
    recent: Mutex<RecentObjects>,
}

impl IngestionTrigger {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        writer: RecordWriter,
        alerts: AlertPublisher,
        settings: TriggerSettings,
    ) -> Self {
        let recent = Mutex::new(RecentObjects::new(settings.dedup_capacity));
        Self {
            blobs,
            writer,
            alerts,
            transform: EnergyTransform,
            settings,
            recent,
        }
    }

    pub fn settings(&self) -> &TriggerSettings {
        &self.settings
    }

    /// One invocation: handle every event in the batch independently.
    pub async fn handle(&self, events: Vec<Envelope<BlobEvent>>) -> InvocationReport {
        let events = stream::iter(events)
            .map(|event| self.handle_event(event))
            .buffered(self.settings.event_concurrency.max(1))
            .collect()
            .await;
        InvocationReport { events }
    }

    async fn handle_event(&self, event: Envelope<BlobEvent>) -> EventReport {
        let object = event.payload.object.clone();
        metrics::counter!("ingest_events_total").increment(1);
        tracing::debug!(object = %object, "blob event received");

        let bytes = match storage_timeout("blob get", self.settings.io_timeout, self.blobs.get(&object)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                metrics::counter!("ingest_fetch_failures_total").increment(1);
                tracing::error!(object = %object, error = %e, retryable = e.is_retryable(), "failed to fetch landed object");
                return EventReport {
                    event,
                    outcome: EventOutcome::FetchFailed(e),
                };
            }
        };

        let digest = blake3::hash(&bytes);
        if self.recent.lock().await.contains(&object, &digest) {
            metrics::counter!("ingest_duplicates_total").increment(1);
            tracing::info!(object = %object, "object already ingested, skipping");
            return EventReport {
                event,
                outcome: EventOutcome::Duplicate,
            };
        }

        let entries = match parse_batch(&bytes) {
            Ok(entries) => entries,
            Err(e) => {
                metrics::counter!("ingest_parse_failures_total").increment(1);
                tracing::error!(object = %object, error = %e, "landed object is not a JSON array of readings");
                return EventReport {
                    event,
                    outcome: EventOutcome::ParseFailed(e),
                };
            }
        };
        tracing::debug!(object = %object, entries = entries.len(), "landed object parsed");

        let received_at = event.received_at;
        let records: Vec<RecordReport> = stream::iter(entries.into_iter().enumerate())
            .map(|(index, entry)| self.handle_record(&object, index, entry, received_at))
            .buffered(self.settings.record_concurrency.max(1))
            .collect()
            .await;

        let report = EventReport {
            event,
            outcome: EventOutcome::Complete { records },
        };
        if !report.needs_retry() {
            self.recent.lock().await.insert(&object, digest);
        }

        let persisted = report
            .records()
            .iter()
            .filter(|r| matches!(r.outcome, RecordOutcome::Persisted { .. }))
            .count();
        tracing::info!(
            object = %object,
            records = report.records().len(),
            persisted,
            retry = report.needs_retry(),
            "landed object processed"
        );
        report
    }

    async fn handle_record(&self, object: &str, index: usize, entry: Value, received_at: SystemTime) -> RecordReport {
        let raw = entry.clone();
        let record = match self
            .transform
            .apply(Envelope {
                payload: entry,
                received_at,
            })
            .await
        {
            Ok(env) => env.payload,
            Err(e) => {
                tracing::warn!(object, index, entry = %raw, error = %e, "rejected batch entry");
                return RecordReport {
                    index,
                    outcome: RecordOutcome::Invalid(e),
                };
            }
        };

        let persisted = self.writer.upsert(&record).await;

        // Alerting does not depend on the upsert having succeeded.
        let alert = if record.anomaly {
            match self.alerts.notify(&record).await {
                Ok(()) => AlertStatus::Alerted,
                Err(e) => AlertStatus::Failed(e.to_string()),
            }
        } else {
            AlertStatus::SkippedNoAnomaly
        };

        let key = record.key();
        let outcome = match persisted {
            Ok(()) => {
                let latency = received_at.elapsed().unwrap_or_default();
                metrics::histogram!("ingest_end_to_end_latency_seconds").record(latency.as_secs_f64());
                RecordOutcome::Persisted { key, alert }
            }
            Err(error) => RecordOutcome::PersistFailed { key, error, alert },
        };
        RecordReport { index, outcome }
    }

    /// Drive the trigger from a notification source until the source ends or
    /// `cancel` fires. Events arriving together are grouped into one
    /// invocation of at most `invocation_size` events.
    pub async fn run(&self, source: &dyn Source<BlobEvent>, cancel: CancellationToken) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut chunks = source
            .stream()
            .await
            .ready_chunks(self.settings.invocation_size.max(1));

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("ingestion trigger cancelled");
                    break;
                }
                next = chunks.next() => match next {
                    Some(chunk) => chunk,
                    None => break,
                },
            };

            let mut events = Vec::with_capacity(chunk.len());
            for item in chunk {
                match item {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        summary.source_errors += 1;
                        tracing::error!(error = %e, "error in blob notification stream");
                    }
                }
            }
            if !events.is_empty() {
                self.invoke_with_retry(events, &mut summary, &cancel).await;
            }
        }

        tracing::info!(?summary, "ingestion trigger stopped");
        summary
    }

    async fn invoke_with_retry(
        &self,
        mut pending: Vec<Envelope<BlobEvent>>,
        summary: &mut RunSummary,
        cancel: &CancellationToken,
    ) {
        let mut attempt: u32 = 0;
        loop {
            let report = self.handle(pending).await;
            summary.absorb(&report);

            let retry = report.retryable_events();
            if retry.is_empty() {
                return;
            }
            if attempt >= self.settings.max_retries {
                metrics::counter!("ingest_events_abandoned_total").increment(retry.len() as u64);
                for event in &retry {
                    tracing::error!(object = %event.payload.object, attempts = attempt + 1, "giving up on landed object");
                }
                summary.abandoned_events += retry.len();
                return;
            }

            attempt += 1;
            let backoff = self.settings.retry_backoff * attempt;
            metrics::counter!("ingest_invocation_retries_total").increment(1);
            tracing::warn!(attempt, events = retry.len(), ?backoff, "retrying invocation after storage failure");

            tokio::select! {
                _ = cancel.cancelled() => {
                    summary.abandoned_events += retry.len();
                    return;
                }
                _ = tokio::time::sleep(backoff) => {}
            }
            pending = retry;
        }
    }
}

/// A landed object must be a JSON array; its entries are validated one by one.
pub fn parse_batch(bytes: &[u8]) -> Result<Vec<Value>, PipelineError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| PipelineError::Parse(format!("invalid JSON: {e}")))?;
    match value {
        Value::Array(entries) => Ok(entries),
        Value::Object(_) => Err(PipelineError::Parse("expected a JSON array, got an object".to_string())),
        other => Err(PipelineError::Parse(format!("expected a JSON array, got {other}"))),
    }
}
