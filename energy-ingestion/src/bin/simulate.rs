use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use energy_ingestion::{
    blob::LandingWriter,
    config::{AppConfig, BlobStoreKind},
    observability,
    sources::{generator::parse_site_ids, Generator},
};
use tokio_util::sync::CancellationToken;

/// Periodically generate synthetic readings and land each batch as one object
/// in the configured blob store.
#[derive(Parser, Debug)]
#[command(name = "simulate", about = "Synthetic energy reading generator")]
struct Cli {
    /// Seconds between batches; defaults to generator.interval_secs.
    #[arg(long, env = "SIM_INTERVAL")]
    interval: Option<u64>,

    /// Readings per site per batch; defaults to generator.batch_size.
    #[arg(long, env = "BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Comma-separated site ids; defaults to generator.site_ids.
    #[arg(long, env = "SIM_SITES")]
    sites: Option<String>,

    /// Land a single batch and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();
    let cli = Cli::parse();
    let cfg = AppConfig::load()?;

    if cfg.blob_store.kind == BlobStoreKind::Memory {
        tracing::warn!("blob_store.kind = \"memory\": landed batches are not visible to other processes");
    }

    let interval = Duration::from_secs(cli.interval.unwrap_or(cfg.generator.interval_secs).max(1));
    let batch_size = cli.batch_size.unwrap_or(cfg.generator.batch_size);
    let sites = cli
        .sites
        .as_deref()
        .map(parse_site_ids)
        .unwrap_or_else(|| cfg.generator.sites());

    let store = cfg.blob_store.open().await?;
    let landing = LandingWriter::new(store).with_io_timeout(cfg.ingestion.io_timeout());
    let mut generator = Generator::new();

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Bad generator input is fatal; a failed landing is retried next tick.
        let readings = generator.generate(batch_size, &sites)?;
        match landing.write(&readings).await {
            Ok(object) => tracing::info!(object = %object, readings = readings.len(), "simulated batch landed"),
            Err(e) if cli.once => return Err(e.into()),
            Err(e) => tracing::error!(error = %e, "failed to land simulated batch"),
        }

        if cli.once {
            break;
        }
    }
    Ok(())
}
