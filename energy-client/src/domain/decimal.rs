//! Serde helpers that put `Decimal` on the wire as a plain JSON number.
//!
//! Both directions go through the decimal's text form. serde_json is built
//! with `arbitrary_precision`, so a `Number` carries the digits it was parsed
//! from and no value is ever rounded through `f64`.

use rust_decimal::Decimal;
use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};

pub fn serialize<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let number: Number = serde_json::from_str(&value.to_string())
        .map_err(|e| ser::Error::custom(format!("decimal {value} is not a JSON number: {e}")))?;
    number.serialize(serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    from_json(&value).ok_or_else(|| de::Error::custom(format!("expected a decimal number, got {value}")))
}

/// Convert a JSON value to a `Decimal`. Only JSON numbers are accepted.
pub fn from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let text = n.to_string();
            text.parse::<Decimal>()
                .ok()
                .or_else(|| Decimal::from_scientific(&text).ok())
        }
        _ => None,
    }
}
