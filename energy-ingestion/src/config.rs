use serde::Deserialize;
use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use crate::blob::{BlobStore, FsBlobStore, MemoryBlobStore};
use crate::sinks::{
    alerts::DEFAULT_ALERT_SUBJECT, FileNotifier, KeyedStore, LogNotifier, MemoryKeyedStore, Notifier,
    PostgresKeyedStore,
};
use crate::sources::generator::{parse_site_ids, MAX_BATCH_READINGS};
use crate::trigger::TriggerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobStoreKind {
    Fs,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlobStoreConfig {
    pub kind: BlobStoreKind,
    /// Directory holding landed objects; required for `fs`.
    pub root: Option<PathBuf>,
    /// Poll the directory for objects landed by other processes; 0 disables.
    #[serde(default)]
    pub poll_interval_ms: u64,
}

impl BlobStoreConfig {
    pub async fn open(&self) -> anyhow::Result<Arc<dyn BlobStore>> {
        match self.kind {
            BlobStoreKind::Memory => Ok(Arc::new(MemoryBlobStore::default())),
            BlobStoreKind::Fs => {
                let root = self
                    .root
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("blob_store.root is required for kind = \"fs\""))?;
                Ok(Arc::new(FsBlobStore::open(root).await?))
            }
        }
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        match (self.kind, self.poll_interval_ms) {
            (BlobStoreKind::Fs, ms) if ms > 0 => Some(Duration::from_millis(ms)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyedStoreKind {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyedStoreConfig {
    pub kind: KeyedStoreKind,
    pub uri: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    8
}

impl KeyedStoreConfig {
    pub async fn connect(&self) -> anyhow::Result<Arc<dyn KeyedStore>> {
        match self.kind {
            KeyedStoreKind::Memory => Ok(Arc::new(MemoryKeyedStore::default())),
            KeyedStoreKind::Postgres => {
                let uri = self
                    .uri
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("keyed_store.uri is required for kind = \"postgres\""))?;
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(self.max_connections)
                    .connect(uri)
                    .await?;
                let store = PostgresKeyedStore::new(pool);
                store.ensure_schema().await?;
                Ok(Arc::new(store))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    Log,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    /// NDJSON file alerts are appended to; required for `file`.
    pub path: Option<PathBuf>,
    #[serde(default = "default_subject")]
    pub subject: String,
}

fn default_subject() -> String {
    DEFAULT_ALERT_SUBJECT.to_string()
}

impl NotifierConfig {
    pub fn build(&self) -> anyhow::Result<Arc<dyn Notifier>> {
        match self.kind {
            NotifierKind::Log => Ok(Arc::new(LogNotifier)),
            NotifierKind::File => {
                let path = self
                    .path
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("notifier.path is required for kind = \"file\""))?;
                Ok(Arc::new(FileNotifier::new(path)))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    /// Comma-separated site ids used when a request does not name any.
    pub site_ids: String,
    pub batch_size: usize,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    60
}

impl GeneratorConfig {
    pub fn sites(&self) -> Vec<String> {
        parse_site_ids(&self.site_ids)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub channel_capacity: usize,
    pub invocation_size: usize,
    pub event_concurrency: usize,
    pub record_concurrency: usize,
    pub io_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub dedup_capacity: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        let t = TriggerSettings::default();
        Self {
            channel_capacity: 1024,
            invocation_size: t.invocation_size,
            event_concurrency: t.event_concurrency,
            record_concurrency: t.record_concurrency,
            io_timeout_ms: t.io_timeout.as_millis() as u64,
            max_retries: t.max_retries,
            retry_backoff_ms: t.retry_backoff.as_millis() as u64,
            dedup_capacity: t.dedup_capacity,
        }
    }
}

impl IngestionConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn trigger_settings(&self) -> TriggerSettings {
        TriggerSettings {
            io_timeout: self.io_timeout(),
            event_concurrency: self.event_concurrency,
            record_concurrency: self.record_concurrency,
            invocation_size: self.invocation_size,
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            dedup_capacity: self.dedup_capacity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub blob_store: BlobStoreConfig,
    pub keyed_store: KeyedStoreConfig,
    pub notifier: NotifierConfig,
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    pub api: ApiConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("INGESTION_CONFIG").unwrap_or_else(|_| "ingestion-config.toml".to_string());
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config {path}: {e}"))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.blob_store.kind == BlobStoreKind::Fs && self.blob_store.root.is_none() {
            anyhow::bail!("blob_store.root is required for kind = \"fs\"");
        }
        if self.keyed_store.kind == KeyedStoreKind::Postgres && self.keyed_store.uri.is_none() {
            anyhow::bail!("keyed_store.uri is required for kind = \"postgres\"");
        }
        if self.notifier.kind == NotifierKind::File && self.notifier.path.is_none() {
            anyhow::bail!("notifier.path is required for kind = \"file\"");
        }
        let sites = self.generator.sites();
        if sites.is_empty() || sites.iter().any(|s| s.is_empty()) {
            anyhow::bail!("generator.site_ids must be a comma-separated list of non-blank site ids");
        }
        if self.generator.batch_size == 0 {
            anyhow::bail!("generator.batch_size must be positive");
        }
        if self.generator.batch_size.saturating_mul(sites.len()) > MAX_BATCH_READINGS {
            anyhow::bail!("generator.batch_size x sites must not exceed {MAX_BATCH_READINGS} readings");
        }

        let i = &self.ingestion;
        for (name, value) in [
            ("channel_capacity", i.channel_capacity),
            ("invocation_size", i.invocation_size),
            ("event_concurrency", i.event_concurrency),
            ("record_concurrency", i.record_concurrency),
        ] {
            if value == 0 {
                anyhow::bail!("ingestion.{name} must be positive");
            }
        }
        if i.io_timeout_ms == 0 {
            anyhow::bail!("ingestion.io_timeout_ms must be positive");
        }
        Ok(())
    }
}
