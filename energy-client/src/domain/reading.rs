use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, OffsetDateTime, UtcOffset};

use crate::domain::decimal;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("entry is not a JSON object")]
    NotAnObject,
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' is not numeric: {value}")]
    NotNumeric { field: &'static str, value: String },
    #[error("site_id must be a non-empty string")]
    InvalidSiteId,
    #[error("invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },
}

/// One raw sensor observation for a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub site_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(with = "decimal")]
    pub energy_generated_kwh: Decimal,
    #[serde(with = "decimal")]
    pub energy_consumed_kwh: Decimal,
}

impl Reading {
    pub fn new(
        site_id: impl Into<String>,
        timestamp: OffsetDateTime,
        energy_generated_kwh: Decimal,
        energy_consumed_kwh: Decimal,
    ) -> Result<Self, ValidationError> {
        let site_id = site_id.into();
        if site_id.trim().is_empty() {
            return Err(ValidationError::InvalidSiteId);
        }

        Ok(Self {
            site_id,
            timestamp: timestamp.to_offset(UtcOffset::UTC),
            energy_generated_kwh,
            energy_consumed_kwh,
        })
    }

    /// Build a reading from one untyped element of a landed batch.
    ///
    /// Required fields are checked in declaration order, so the error names the
    /// first field that is absent or malformed.
    pub fn from_value(entry: &Value) -> Result<Self, ValidationError> {
        let obj = entry.as_object().ok_or(ValidationError::NotAnObject)?;
        let field = |name: &'static str| {
            obj.get(name)
                .filter(|v| !v.is_null())
                .ok_or(ValidationError::MissingField(name))
        };

        let site_id = field("site_id")?
            .as_str()
            .ok_or(ValidationError::InvalidSiteId)?;

        let ts_value = field("timestamp")?;
        let ts_text = ts_value
            .as_str()
            .ok_or_else(|| ValidationError::InvalidTimestamp {
                value: ts_value.to_string(),
                reason: "expected an RFC 3339 string".to_string(),
            })?;
        let timestamp = parse_timestamp(ts_text)?;

        let generated = numeric_field(field("energy_generated_kwh")?, "energy_generated_kwh")?;
        let consumed = numeric_field(field("energy_consumed_kwh")?, "energy_consumed_kwh")?;

        Self::new(site_id, timestamp, generated, consumed)
    }
}

fn numeric_field(value: &Value, field: &'static str) -> Result<Decimal, ValidationError> {
    decimal::from_json(value).ok_or_else(|| ValidationError::NotNumeric {
        field,
        value: value.to_string(),
    })
}

/// Parse an RFC 3339 timestamp and normalise it to UTC.
pub fn parse_timestamp(text: &str) -> Result<OffsetDateTime, ValidationError> {
    OffsetDateTime::parse(text.trim(), &Rfc3339)
        .map(|ts| ts.to_offset(UtcOffset::UTC))
        .map_err(|e| ValidationError::InvalidTimestamp {
            value: text.to_string(),
            reason: e.to_string(),
        })
}
