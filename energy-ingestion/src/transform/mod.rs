use energy_client::domain::{EnergyRecord, Reading, ValidationError};
use serde_json::Value;

use crate::pipeline::{Envelope, PipelineError, Transform};

/// Pure transform of one landed batch entry into an `EnergyRecord`.
///
/// Rules:
/// - all four reading fields must be present, energies must be JSON numbers,
///   the timestamp must be RFC 3339 and the site id non-blank;
/// - `net_energy_kwh = energy_generated_kwh - energy_consumed_kwh`, exact;
/// - `anomaly` is set when either energy value is negative.
pub fn transform_entry(entry: &Value) -> Result<EnergyRecord, ValidationError> {
    Reading::from_value(entry).map(EnergyRecord::from_reading)
}

#[derive(Clone, Default)]
pub struct EnergyTransform;

#[async_trait::async_trait]
impl Transform<Value, EnergyRecord> for EnergyTransform {
    async fn apply(&self, input: Envelope<Value>) -> Result<Envelope<EnergyRecord>, PipelineError> {
        match transform_entry(&input.payload) {
            Ok(record) => {
                if record.anomaly {
                    metrics::counter!("transform_anomalies_total").increment(1);
                }
                Ok(Envelope {
                    payload: record,
                    received_at: input.received_at,
                })
            }
            Err(e) => {
                metrics::counter!("validation_energy_record_rejected_total").increment(1);
                Err(e.into())
            }
        }
    }
}
