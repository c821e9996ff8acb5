use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::domain::{decimal, Reading};

/// A reading enriched with its derived net energy and anomaly flag.
///
/// This is also the shape of a persisted entry: `site_id` is the partition key
/// and `timestamp` the sort key (column `ts`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EnergyRecord {
    pub site_id: String,
    #[serde(with = "time::serde::rfc3339")]
    #[sqlx(rename = "ts")]
    pub timestamp: OffsetDateTime,
    #[serde(with = "decimal")]
    pub energy_generated_kwh: Decimal,
    #[serde(with = "decimal")]
    pub energy_consumed_kwh: Decimal,
    #[serde(with = "decimal")]
    pub net_energy_kwh: Decimal,
    pub anomaly: bool,
}

impl EnergyRecord {
    /// Derive the record for a reading. Pure and deterministic.
    pub fn from_reading(reading: Reading) -> Self {
        let net_energy_kwh = reading.energy_generated_kwh - reading.energy_consumed_kwh;
        let anomaly =
            reading.energy_generated_kwh < Decimal::ZERO || reading.energy_consumed_kwh < Decimal::ZERO;

        Self {
            site_id: reading.site_id,
            timestamp: reading.timestamp,
            energy_generated_kwh: reading.energy_generated_kwh,
            energy_consumed_kwh: reading.energy_consumed_kwh,
            net_energy_kwh,
            anomaly,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            site_id: self.site_id.clone(),
            timestamp: self.timestamp,
        }
    }
}

impl From<Reading> for EnergyRecord {
    fn from(reading: Reading) -> Self {
        Self::from_reading(reading)
    }
}

/// Composite key of a persisted entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub site_id: String,
    pub timestamp: OffsetDateTime,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp.format(&Rfc3339) {
            Ok(ts) => write!(f, "{}@{}", self.site_id, ts),
            Err(_) => write!(f, "{}@{}", self.site_id, self.timestamp),
        }
    }
}
