//! Telemetry snapshot assembled by one poll cycle

use std::collections::BTreeMap;

use serde_json::{Number, Value};

use crate::error::{NibeSrvError, Result};

/// Key of the cycle start time in the published payload
pub const TIMESTAMP_KEY: &str = "timestamp";

/// One complete, consistent set of scaled values
#[derive(Debug, Clone, PartialEq)]
pub struct PollSnapshot {
    /// Epoch seconds at cycle start
    pub timestamp: i64,
    /// display name -> scaled value
    pub values: BTreeMap<String, f64>,
    pub cycle_counter: u64,
    pub defrost_counter: Option<u64>,
}

impl PollSnapshot {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
            cycle_counter: 0,
            defrost_counter: None,
        }
    }

    pub fn insert(&mut self, display_name: impl Into<String>, value: f64) {
        self.values.insert(display_name.into(), value);
    }

    /// Compact JSON object with sorted keys
    ///
    /// Contains every value, the timestamp and, if present, the defrost
    /// counter under `defrost_field`. The cycle counter travels separately.
    pub fn to_payload(&self, defrost_field: &str) -> Result<String> {
        let mut fields: BTreeMap<&str, Value> = BTreeMap::new();

        for (name, value) in &self.values {
            let number = Number::from_f64(*value).ok_or_else(|| {
                NibeSrvError::data(format!("{} has non-finite value {}", name, value))
            })?;
            fields.insert(name.as_str(), Value::Number(number));
        }
        fields.insert(TIMESTAMP_KEY, Value::from(self.timestamp));
        if let Some(count) = self.defrost_counter {
            fields.insert(defrost_field, Value::from(count));
        }

        Ok(serde_json::to_string(&fields)?)
    }
}
