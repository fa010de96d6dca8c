//! Lenient string deserializers for configuration fields
//!
//! Environment overrides arrive type-guessed: `NIBESRV_DEFROST__REGISTER=31805`
//! is a number by the time serde sees it. Fields that are strings by nature
//! (register ids, host names, credentials) accept:
//! - String `"31805"` → `"31805"`
//! - Native number `31805` → `"31805"`
//! - Boolean `true` → `"true"`

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    String(String),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Bool(bool),
}

impl From<Scalar> for String {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::String(s) => s,
            Scalar::Unsigned(n) => n.to_string(),
            Scalar::Signed(n) => n.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

/// `String` field that also accepts numbers and booleans
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Scalar::deserialize(deserializer).map(String::from)
}

/// `Option<String>` field that also accepts numbers and booleans
pub fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(String::from))
}

/// `Vec<String>` field whose items may be numbers
pub fn strings_or_numbers<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Vec::<Scalar>::deserialize(deserializer)?
        .into_iter()
        .map(String::from)
        .collect())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(deserialize_with = "string_or_number")]
        id: String,
        #[serde(default, deserialize_with = "optional_string_or_number")]
        secret: Option<String>,
        #[serde(default, deserialize_with = "strings_or_numbers")]
        ids: Vec<String>,
    }

    #[test]
    fn test_numbers_become_strings() {
        let sample: Sample = serde_json::from_value(json!({
            "id": 31805,
            "secret": 12345,
            "ids": [30001, "40011", -1, 2.5, true]
        }))
        .unwrap();
        assert_eq!(sample.id, "31805");
        assert_eq!(sample.secret.as_deref(), Some("12345"));
        assert_eq!(sample.ids, vec!["30001", "40011", "-1", "2.5", "true"]);
    }

    #[test]
    fn test_strings_and_absent_values() {
        let sample: Sample = serde_json::from_value(json!({"id": "nibe.local"})).unwrap();
        assert_eq!(sample.id, "nibe.local");
        assert!(sample.secret.is_none());
        assert!(sample.ids.is_empty());

        let sample: Sample = serde_json::from_value(json!({"id": "x", "secret": null})).unwrap();
        assert!(sample.secret.is_none());
    }

    #[test]
    fn test_nested_values_are_rejected() {
        let result: Result<Sample, _> = serde_json::from_value(json!({"id": {"a": 1}}));
        assert!(result.is_err());
    }
}
