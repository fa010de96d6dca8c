//! Register catalog
//!
//! Loads per-register metadata (name, scale factor) from the JSON register
//! description and normalizes it into [`RegisterDescriptor`]s. The catalog is
//! built once at startup and read-only afterwards.
//!
//! # Register id encoding
//!
//! One id string encodes both register space and address:
//!
//! | id          | space            | address         |
//! |-------------|------------------|-----------------|
//! | `< 10000`   | coil             | the value       |
//! | `0abcd`     | coil             | `abcd`          |
//! | `1abcd`     | discrete input   | `abcd`          |
//! | `3abcd`     | input register   | `abcd`          |
//! | `4abcd`     | holding register | `abcd`          |
//!
//! Coil ids below 10000 carry no selector digit, so `"1805"` is coil 1805
//! while `"11805"` is discrete input 1805.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{NibeSrvError, RegisterIdError, Result};

/// Ids below this value are plain coil addresses
const COIL_ONLY_LIMIT: u64 = 10_000;

/// One of the four independent Modbus address ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterSpace {
    Coil,
    DiscreteInput,
    InputRegister,
    HoldingRegister,
}

impl RegisterSpace {
    /// Map the leading selector digit of a 5+ digit id
    fn from_selector(selector: char) -> Option<Self> {
        match selector {
            '0' => Some(Self::Coil),
            '1' => Some(Self::DiscreteInput),
            '3' => Some(Self::InputRegister),
            '4' => Some(Self::HoldingRegister),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coil => "coil",
            Self::DiscreteInput => "discrete_input",
            Self::InputRegister => "input_register",
            Self::HoldingRegister => "holding_register",
        }
    }
}

impl fmt::Display for RegisterSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded register id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterAddress {
    pub space: RegisterSpace,
    pub address: u16,
}

/// Decode a register-id string into space and address
pub fn decode_register_id(id: &str) -> std::result::Result<RegisterAddress, RegisterIdError> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RegisterIdError::NotNumeric(id.to_string()));
    }

    let value: u64 = id
        .parse()
        .map_err(|_| RegisterIdError::AddressOutOfRange(id.to_string()))?;

    if value < COIL_ONLY_LIMIT {
        return Ok(RegisterAddress {
            space: RegisterSpace::Coil,
            address: value as u16,
        });
    }

    // Non-empty and all ASCII digits, checked above
    let (head, rest) = id.split_at(1);
    let selector = head.chars().next().unwrap_or('?');
    let space = RegisterSpace::from_selector(selector).ok_or_else(|| {
        RegisterIdError::UnknownSpace {
            id: id.to_string(),
            selector,
        }
    })?;

    let address: u16 = rest
        .parse()
        .map_err(|_| RegisterIdError::AddressOutOfRange(id.to_string()))?;

    Ok(RegisterAddress { space, address })
}

/// Normalize a raw metadata name into a display name
///
/// `"average-temperature-bt1-30001"` at address 1 becomes
/// `"00001-average-temperature-bt1"`: trailing digits and then trailing
/// separators are stripped, and the zero-padded address is prepended.
/// A name that already carries its own prefix is returned unchanged.
pub fn normalize_name(address: u16, raw_name: &str) -> String {
    let prefix = format!("{:05}-", address);
    if raw_name.starts_with(&prefix) {
        return raw_name.to_string();
    }

    let stripped = raw_name
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .trim_end_matches('-');
    format!("{}{}", prefix, stripped)
}

/// Metadata for one monitored register
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterDescriptor {
    /// Id string as it appears in the metadata and the poll list
    pub register_id: String,
    pub space: RegisterSpace,
    pub address: u16,
    /// Normalized, catalog-unique name used as the message field key
    pub display_name: String,
    /// Divisor applied to the raw value
    pub scale_factor: f64,
}

impl RegisterDescriptor {
    /// Published value for a raw register value
    pub fn scale(&self, raw: u16) -> f64 {
        f64::from(raw) / self.scale_factor
    }
}

/// Entry as found in the register description file
#[derive(Debug, Deserialize)]
struct RawRegisterEntry {
    name: String,
    factor: f64,
}

/// Immutable map from register-id string to descriptor
#[derive(Debug, Clone, Default)]
pub struct RegisterCatalog {
    entries: BTreeMap<String, RegisterDescriptor>,
}

impl RegisterCatalog {
    /// Load and normalize the register description file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            NibeSrvError::catalog(format!("cannot read {}: {}", path.display(), e))
        })?;

        let catalog = Self::from_json_str(&content)
            .map_err(|e| NibeSrvError::catalog(format!("{}: {}", path.display(), e)))?;
        info!(
            "Register catalog loaded: {} registers from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Build a catalog from the JSON register description
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, RawRegisterEntry> = serde_json::from_str(json)
            .map_err(|e| NibeSrvError::catalog(format!("malformed metadata: {}", e)))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: BTreeMap<String, RawRegisterEntry>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        let mut owners: BTreeMap<String, String> = BTreeMap::new();

        for (register_id, entry) in raw {
            let decoded = decode_register_id(&register_id)?;

            if entry.factor == 0.0 || !entry.factor.is_finite() {
                return Err(NibeSrvError::catalog(format!(
                    "register {} has invalid factor {}",
                    register_id, entry.factor
                )));
            }

            let display_name = normalize_name(decoded.address, &entry.name);
            if let Some(other) = owners.insert(display_name.clone(), register_id.clone()) {
                return Err(NibeSrvError::catalog(format!(
                    "registers {} and {} both normalize to '{}'",
                    other, register_id, display_name
                )));
            }

            debug!(
                "Register {} -> {} {} '{}' /{}",
                register_id, decoded.space, decoded.address, display_name, entry.factor
            );

            entries.insert(
                register_id.clone(),
                RegisterDescriptor {
                    register_id,
                    space: decoded.space,
                    address: decoded.address,
                    display_name,
                    scale_factor: entry.factor,
                },
            );
        }

        Ok(Self { entries })
    }

    pub fn get(&self, register_id: &str) -> Option<&RegisterDescriptor> {
        self.entries.get(register_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.entries.values()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_decode_coil_below_limit() {
        for (id, address) in [("0", 0), ("1805", 1805), ("9999", 9999), ("0042", 42)] {
            let decoded = decode_register_id(id).unwrap();
            assert_eq!(decoded.space, RegisterSpace::Coil, "id {}", id);
            assert_eq!(decoded.address, address);
        }
    }

    #[test]
    fn test_decode_selector_digits() {
        let cases = [
            ("01805", RegisterSpace::Coil, 1805),
            ("10000", RegisterSpace::DiscreteInput, 0),
            ("11805", RegisterSpace::DiscreteInput, 1805),
            ("30001", RegisterSpace::InputRegister, 1),
            ("31805", RegisterSpace::InputRegister, 1805),
            ("40011", RegisterSpace::HoldingRegister, 11),
            ("465535", RegisterSpace::HoldingRegister, 65535),
        ];
        for (id, space, address) in cases {
            let decoded = decode_register_id(id).unwrap();
            assert_eq!(decoded, RegisterAddress { space, address }, "id {}", id);
        }
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            decode_register_id("21805"),
            Err(RegisterIdError::UnknownSpace {
                id: "21805".to_string(),
                selector: '2'
            })
        );
        assert!(matches!(
            decode_register_id("5000"),
            Ok(RegisterAddress {
                space: RegisterSpace::Coil,
                address: 5000
            })
        ));
        assert!(matches!(
            decode_register_id("50001"),
            Err(RegisterIdError::UnknownSpace { .. })
        ));
        assert!(matches!(
            decode_register_id("3x001"),
            Err(RegisterIdError::NotNumeric(_))
        ));
        assert!(matches!(
            decode_register_id(""),
            Err(RegisterIdError::NotNumeric(_))
        ));
        assert!(matches!(
            decode_register_id("-3000"),
            Err(RegisterIdError::NotNumeric(_))
        ));
        assert!(matches!(
            decode_register_id("465536"),
            Err(RegisterIdError::AddressOutOfRange(_))
        ));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(
            normalize_name(1, "average-temperature-bt1-30001"),
            "00001-average-temperature-bt1"
        );
        assert_eq!(
            normalize_name(1805, "defrosting-eb101-31805"),
            "01805-defrosting-eb101"
        );
        assert_eq!(normalize_name(37, "outdoor-temp--"), "00037-outdoor-temp");
    }

    #[test]
    fn test_normalize_name_is_idempotent() {
        let once = normalize_name(1, "average-temperature-bt1-30001");
        assert_eq!(once, "00001-average-temperature-bt1");
        assert_eq!(normalize_name(1, &once), once);
        assert_eq!(normalize_name(1, &normalize_name(1, &once)), once);
    }

    #[test]
    fn test_from_json_str() {
        let json = r#"{
            "30001": {"name": "average-temperature-bt1-30001", "factor": 10, "unit": "°C"},
            "31805": {"name": "defrosting-eb101-31805", "factor": 1},
            "40011": {"name": "heating-offset-40011", "factor": 1.0}
        }"#;
        let catalog = RegisterCatalog::from_json_str(json).unwrap();
        assert_eq!(catalog.len(), 3);

        let bt1 = catalog.get("30001").unwrap();
        assert_eq!(bt1.space, RegisterSpace::InputRegister);
        assert_eq!(bt1.address, 1);
        assert_eq!(bt1.display_name, "00001-average-temperature-bt1");
        assert_eq!(bt1.scale(500), 50.0);

        let defrost = catalog.get("31805").unwrap();
        assert_eq!(defrost.display_name, "01805-defrosting-eb101");

        assert_eq!(
            catalog.get("40011").unwrap().space,
            RegisterSpace::HoldingRegister
        );
        assert!(catalog.get("30002").is_none());
    }

    #[test]
    fn test_from_json_str_rejects_bad_input() {
        assert!(matches!(
            RegisterCatalog::from_json_str("[1, 2, 3]"),
            Err(NibeSrvError::CatalogLoadError(_))
        ));
        assert!(matches!(
            RegisterCatalog::from_json_str(r#"{"30001": {"name": "x"}}"#),
            Err(NibeSrvError::CatalogLoadError(_))
        ));
        assert!(matches!(
            RegisterCatalog::from_json_str(r#"{"30001": {"name": "x", "factor": 0}}"#),
            Err(NibeSrvError::CatalogLoadError(_))
        ));
        assert!(matches!(
            RegisterCatalog::from_json_str(r#"{"21805": {"name": "x", "factor": 1}}"#),
            Err(NibeSrvError::CatalogLoadError(_))
        ));
    }

    #[test]
    fn test_duplicate_display_names_rejected() {
        // Same address and name in two spaces
        let json = r#"{
            "30010": {"name": "pump-speed-30010", "factor": 1},
            "40010": {"name": "pump-speed-40010", "factor": 1}
        }"#;
        let err = RegisterCatalog::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("00010-pump-speed"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registers.json");
        std::fs::write(&path, r#"{"30001": {"name": "bt1-30001", "factor": 10}}"#).unwrap();

        let catalog = RegisterCatalog::load(&path).unwrap();
        assert_eq!(catalog.iter().count(), 1);

        let missing = RegisterCatalog::load(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(missing, NibeSrvError::CatalogLoadError(_)));
    }
}
