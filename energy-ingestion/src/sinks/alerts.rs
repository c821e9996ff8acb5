use std::{path::PathBuf, sync::Arc, time::Duration};

use energy_client::domain::EnergyRecord;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::io::AsyncWriteExt;

use crate::pipeline::PipelineError;

pub const DEFAULT_ALERT_SUBJECT: &str = "Energy Anomaly Alert";

/// Publish side of a notification topic. Fire-and-forget: success means the
/// message was handed off, not delivered.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, subject: &str, message: &str) -> Result<(), PipelineError>;
}

/// Emits alerts as structured log events.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, subject: &str, message: &str) -> Result<(), PipelineError> {
        tracing::warn!(subject, message, "alert published");
        Ok(())
    }
}

/// Appends alerts as NDJSON lines to a file.
pub struct FileNotifier {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileNotifier {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[derive(serde::Serialize)]
struct AlertLine<'a> {
    subject: &'a str,
    message: &'a str,
    published_at: String,
}

#[async_trait::async_trait]
impl Notifier for FileNotifier {
    async fn publish(&self, subject: &str, message: &str) -> Result<(), PipelineError> {
        let published_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| PipelineError::Notification(format!("failed to format publish time: {e}")))?;
        let mut line = serde_json::to_string(&AlertLine {
            subject,
            message,
            published_at,
        })
        .map_err(|e| PipelineError::Notification(format!("failed to encode alert: {e}")))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| PipelineError::Notification(format!("failed to open {}: {e}", self.path.display())))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| PipelineError::Notification(format!("failed to append alert: {e}")))?;
        file.flush()
            .await
            .map_err(|e| PipelineError::Notification(format!("failed to flush alert: {e}")))?;
        Ok(())
    }
}

/// Human-readable alert body for an anomalous record.
pub fn format_alert(record: &EnergyRecord) -> String {
    let timestamp = record
        .timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| record.timestamp.to_string());

    format!(
        "Anomaly Detected!\nSite: {}\nTimestamp: {}\nGenerated: {}\nConsumed: {}",
        record.site_id, timestamp, record.energy_generated_kwh, record.energy_consumed_kwh
    )
}

/// Sends anomaly alerts through a `Notifier`, bounded by a timeout.
#[derive(Clone)]
pub struct AlertPublisher {
    notifier: Arc<dyn Notifier>,
    subject: String,
    io_timeout: Duration,
}

impl AlertPublisher {
    pub fn new(notifier: Arc<dyn Notifier>, subject: impl Into<String>, io_timeout: Duration) -> Self {
        Self {
            notifier,
            subject: subject.into(),
            io_timeout,
        }
    }

    pub async fn notify(&self, record: &EnergyRecord) -> Result<(), PipelineError> {
        let message = format_alert(record);
        let res = match tokio::time::timeout(self.io_timeout, self.notifier.publish(&self.subject, &message)).await {
            Ok(res) => res,
            Err(_) => Err(PipelineError::Notification(format!(
                "publish timed out after {:?}",
                self.io_timeout
            ))),
        };

        match &res {
            Ok(()) => {
                metrics::counter!("alerts_published_total").increment(1);
                tracing::info!(key = %record.key(), "anomaly alert published");
            }
            Err(e) => {
                metrics::counter!("alerts_failed_total").increment(1);
                tracing::error!(key = %record.key(), error = %e, "anomaly alert failed");
            }
        }
        res
    }
}
