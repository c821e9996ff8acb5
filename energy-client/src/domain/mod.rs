pub mod decimal;
pub mod reading;
pub mod record;

pub use reading::{parse_timestamp, Reading, ValidationError};
pub use record::{EnergyRecord, RecordKey};
