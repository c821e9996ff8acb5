use energy_client::domain::RecordKey;

use crate::blob::BlobEvent;
use crate::pipeline::{Envelope, PipelineError, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertStatus {
    SkippedNoAnomaly,
    Alerted,
    Failed(String),
}

/// Terminal state of one entry of a landed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Persisted {
        key: RecordKey,
        alert: AlertStatus,
    },
    /// The upsert failed; the alert, if any, was still attempted.
    PersistFailed {
        key: RecordKey,
        error: StorageError,
        alert: AlertStatus,
    },
    Invalid(PipelineError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordReport {
    /// Position of the entry inside the landed array.
    pub index: usize,
    pub outcome: RecordOutcome,
}

impl RecordReport {
    pub fn alert(&self) -> Option<&AlertStatus> {
        match &self.outcome {
            RecordOutcome::Persisted { alert, .. } | RecordOutcome::PersistFailed { alert, .. } => Some(alert),
            RecordOutcome::Invalid(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Complete { records: Vec<RecordReport> },
    FetchFailed(StorageError),
    ParseFailed(PipelineError),
    /// Already processed in this process with identical content.
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct EventReport {
    pub event: Envelope<BlobEvent>,
    pub outcome: EventOutcome,
}

impl EventReport {
    pub fn records(&self) -> &[RecordReport] {
        match &self.outcome {
            EventOutcome::Complete { records } => records,
            _ => &[],
        }
    }

    /// Whether a transient storage failure left work undone for this event.
    pub fn needs_retry(&self) -> bool {
        match &self.outcome {
            EventOutcome::FetchFailed(e) => e.is_retryable(),
            EventOutcome::Complete { records } => records.iter().any(|r| {
                matches!(&r.outcome, RecordOutcome::PersistFailed { error, .. } if error.is_retryable())
            }),
            EventOutcome::ParseFailed(_) | EventOutcome::Duplicate => false,
        }
    }

    /// Event-level failure, if the event did not get as far as its records.
    pub fn error(&self) -> Option<PipelineError> {
        match &self.outcome {
            EventOutcome::FetchFailed(e) => Some(PipelineError::Storage(e.clone())),
            EventOutcome::ParseFailed(e) => Some(e.clone()),
            EventOutcome::Complete { .. } | EventOutcome::Duplicate => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InvocationReport {
    pub events: Vec<EventReport>,
}

impl InvocationReport {
    fn records(&self) -> impl Iterator<Item = &RecordReport> {
        self.events.iter().flat_map(|e| e.records())
    }

    pub fn persisted(&self) -> usize {
        self.records()
            .filter(|r| matches!(r.outcome, RecordOutcome::Persisted { .. }))
            .count()
    }

    pub fn failed_records(&self) -> usize {
        self.records()
            .filter(|r| !matches!(r.outcome, RecordOutcome::Persisted { .. }))
            .count()
    }

    pub fn alerts_sent(&self) -> usize {
        self.records()
            .filter(|r| r.alert() == Some(&AlertStatus::Alerted))
            .count()
    }

    pub fn alerts_failed(&self) -> usize {
        self.records()
            .filter(|r| matches!(r.alert(), Some(AlertStatus::Failed(_))))
            .count()
    }

    pub fn parse_failures(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.outcome, EventOutcome::ParseFailed(_)))
            .count()
    }

    pub fn retryable_events(&self) -> Vec<Envelope<BlobEvent>> {
        self.events
            .iter()
            .filter(|e| e.needs_retry())
            .map(|e| e.event.clone())
            .collect()
    }
}

/// Totals over a trigger run. Retried events are counted once per attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub invocations: usize,
    pub events: usize,
    pub duplicates: usize,
    pub records_persisted: usize,
    pub records_failed: usize,
    pub alerts_sent: usize,
    pub alerts_failed: usize,
    pub parse_failures: usize,
    pub source_errors: usize,
    pub abandoned_events: usize,
}

impl RunSummary {
    pub fn absorb(&mut self, report: &InvocationReport) {
        self.invocations += 1;
        self.events += report.events.len();
        self.duplicates += report
            .events
            .iter()
            .filter(|e| e.outcome == EventOutcome::Duplicate)
            .count();
        self.records_persisted += report.persisted();
        self.records_failed += report.failed_records();
        self.alerts_sent += report.alerts_sent();
        self.alerts_failed += report.alerts_failed();
        self.parse_failures += report.parse_failures();
    }
}
