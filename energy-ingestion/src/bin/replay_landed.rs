use anyhow::Result;
use clap::Parser;
use energy_ingestion::{
    config::AppConfig,
    observability,
    sinks::{AlertPublisher, RecordWriter},
    sources::LandedObjectsSource,
    trigger::IngestionTrigger,
};
use tokio_util::sync::CancellationToken;

/// Re-run ingestion over objects already in the blob store. Upserts are keyed,
/// so replaying is safe; anomaly alerts are re-sent for replayed records.
#[derive(Parser, Debug)]
#[command(name = "replay_landed", about = "Replay landed energy batches through ingestion")]
struct Cli {
    /// Only replay objects whose name starts with this prefix.
    #[arg(long)]
    prefix: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();
    let cli = Cli::parse();
    let cfg = AppConfig::load()?;

    let io_timeout = cfg.ingestion.io_timeout();
    let blobs = cfg.blob_store.open().await?;
    let records = cfg.keyed_store.connect().await?;
    let notifier = cfg.notifier.build()?;

    let trigger = IngestionTrigger::new(
        blobs.clone(),
        RecordWriter::new(records, io_timeout),
        AlertPublisher::new(notifier, cfg.notifier.subject.clone(), io_timeout),
        cfg.ingestion.trigger_settings(),
    );

    let mut source = LandedObjectsSource::new(blobs);
    if let Some(prefix) = cli.prefix {
        source = source.with_prefix(prefix);
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    let summary = trigger.run(&source, cancel).await;
    tracing::info!(
        events = summary.events,
        persisted = summary.records_persisted,
        failed = summary.records_failed,
        alerts = summary.alerts_sent,
        parse_failures = summary.parse_failures,
        "replay finished"
    );

    if summary.abandoned_events > 0 || summary.source_errors > 0 {
        anyhow::bail!(
            "{} landed objects could not be ingested ({} source errors)",
            summary.abandoned_events,
            summary.source_errors
        );
    }
    Ok(())
}
