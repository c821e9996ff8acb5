use std::collections::HashMap;

use energy_client::domain::Reading;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rust_decimal::Decimal;
use time::{Duration, OffsetDateTime};

use crate::pipeline::PipelineError;

/// Generated kWh is sampled in hundredths over [-10.00, 100.00]; negative
/// values simulate faulty sensors.
const GENERATED_CENTS: std::ops::RangeInclusive<i64> = -1_000..=10_000;
/// Consumed kWh is sampled in hundredths over [0.00, 90.00].
const CONSUMED_CENTS: std::ops::RangeInclusive<i64> = 0..=9_000;
/// Upper bound on readings produced by one `generate` call.
pub const MAX_BATCH_READINGS: usize = 100_000;

/// Synthetic reading generator.
///
/// Timestamps are UTC with microsecond precision and strictly increase per
/// site, so two readings from the same generator never share a composite key.
pub struct Generator {
    rng: StdRng,
    last_ts: HashMap<String, OffsetDateTime>,
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng,
            last_ts: HashMap::new(),
        }
    }

    /// Produce `batch_size` readings for every distinct site id, site-major
    /// within each repetition.
    pub fn generate(&mut self, batch_size: usize, site_ids: &[String]) -> Result<Vec<Reading>, PipelineError> {
        if batch_size < 1 {
            return Err(PipelineError::Config("batch_size must be at least 1".to_string()));
        }
        let sites = distinct_sites(site_ids)?;

        let total = batch_size
            .checked_mul(sites.len())
            .filter(|total| *total <= MAX_BATCH_READINGS)
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "batch_size {batch_size} for {} sites exceeds {MAX_BATCH_READINGS} readings",
                    sites.len()
                ))
            })?;

        let mut readings = Vec::with_capacity(total);
        for _ in 0..batch_size {
            for site_id in &sites {
                let timestamp = self.next_timestamp(site_id);
                let generated = Decimal::new(self.rng.gen_range(GENERATED_CENTS), 2);
                let consumed = Decimal::new(self.rng.gen_range(CONSUMED_CENTS), 2);

                match Reading::new(site_id.as_str(), timestamp, generated, consumed) {
                    Ok(reading) => readings.push(reading),
                    Err(e) => {
                        metrics::counter!("generator_readings_dropped_total").increment(1);
                        tracing::warn!(site_id = %site_id, error = %e, "dropping invalid generated reading");
                    }
                }
            }
        }

        metrics::counter!("generator_readings_total").increment(readings.len() as u64);
        Ok(readings)
    }

    fn next_timestamp(&mut self, site_id: &str) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        let mut ts = now
            .replace_nanosecond(now.nanosecond() / 1_000 * 1_000)
            .unwrap_or(now);

        if let Some(prev) = self.last_ts.get(site_id) {
            if ts <= *prev {
                ts = *prev + Duration::microseconds(1);
            }
        }
        self.last_ts.insert(site_id.to_string(), ts);
        ts
    }
}

fn distinct_sites(site_ids: &[String]) -> Result<Vec<String>, PipelineError> {
    let mut sites: Vec<String> = Vec::with_capacity(site_ids.len());
    for raw in site_ids {
        let site = raw.trim();
        if site.is_empty() {
            return Err(PipelineError::Config("site ids must not be blank".to_string()));
        }
        if !sites.iter().any(|s| s == site) {
            sites.push(site.to_string());
        }
    }

    if sites.is_empty() {
        return Err(PipelineError::Config("at least one site id is required".to_string()));
    }
    Ok(sites)
}

/// Split a comma-separated site list, trimming whitespace around each id.
pub fn parse_site_ids(csv: &str) -> Vec<String> {
    if csv.trim().is_empty() {
        return Vec::new();
    }
    csv.split(',').map(|s| s.trim().to_string()).collect()
}
