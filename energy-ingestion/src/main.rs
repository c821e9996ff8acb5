use anyhow::Result;
use energy_ingestion::{
    api::{self, AppState},
    blob::{BlobStore, LandingWriter, NotifyingBlobStore},
    config::AppConfig,
    metrics_server,
    observability,
    sinks::{AlertPublisher, RecordWriter},
    sources::{blob_events::spawn_poller, BlobEventSource, Generator},
    trigger::IngestionTrigger,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let io_timeout = cfg.ingestion.io_timeout();
    let landed = cfg.blob_store.open().await?;
    let records = cfg.keyed_store.connect().await?;
    let notifier = cfg.notifier.build()?;

    // Writes through the API notify the trigger directly; objects landed by
    // other processes are picked up by the poller.
    let (events, source) = BlobEventSource::channel(cfg.ingestion.channel_capacity);
    let notifying: Arc<dyn BlobStore> = Arc::new(NotifyingBlobStore::new(landed.clone(), events.clone()));

    let cancel = CancellationToken::new();
    let poller = cfg
        .blob_store
        .poll_interval()
        .map(|interval| spawn_poller(landed.clone(), events.clone(), interval, cancel.clone()));
    drop(events);

    let trigger = IngestionTrigger::new(
        landed,
        RecordWriter::new(records.clone(), io_timeout),
        AlertPublisher::new(notifier, cfg.notifier.subject.clone(), io_timeout),
        cfg.ingestion.trigger_settings(),
    );

    let state = Arc::new(AppState {
        records,
        blobs: notifying.clone(),
        landing: LandingWriter::new(notifying).with_io_timeout(io_timeout),
        generator: Mutex::new(Generator::new()),
        default_sites: cfg.generator.sites(),
        default_batch_size: cfg.generator.batch_size,
        io_timeout,
    });

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown requested");
                shutdown.cancel();
            }
            Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
        }
    });

    let ingest = async {
        let summary = trigger.run(&source, cancel.clone()).await;
        Ok::<_, anyhow::Error>(summary)
    };
    let serve = api::serve(state, &cfg.api.bind_addr, cancel.clone());

    // Run the trigger and the API until shutdown
    let (summary, ()) = tokio::try_join!(ingest, serve)?;

    if let Some(poller) = poller {
        let _ = poller.await;
    }
    tracing::info!(?summary, "energy ingestion stopped");
    Ok(())
}
