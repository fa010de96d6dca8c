//! Service configuration
//!
//! YAML file merged with `NIBESRV_` environment overrides, nested keys
//! separated by `__` (e.g. `NIBESRV_MQTT__BROKER=10.0.0.2`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::catalog::decode_register_id;
use crate::error::{NibeSrvError, Result};
use crate::serde_helpers::{optional_string_or_number, string_or_number, strings_or_numbers};

pub const DEFAULT_CONFIG_PATH: &str = "config/nibesrv.yaml";
pub const ENV_PREFIX: &str = "NIBESRV_";

/// Service section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    #[serde(deserialize_with = "string_or_number")]
    pub name: String,
    /// Poll cycles per hour
    pub read_rate: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "nibesrv".to_string(),
            read_rate: 60,
        }
    }
}

/// Modbus TCP endpoint of the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    #[serde(deserialize_with = "string_or_number")]
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub timeout_ms: u64,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 502,
            unit_id: 1,
            timeout_ms: 1000,
        }
    }
}

impl ModbusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// MQTT broker and topic layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    #[serde(deserialize_with = "string_or_number")]
    pub broker: String,
    pub port: u16,
    #[serde(deserialize_with = "string_or_number")]
    pub client_id: String,
    pub qos: u8,
    #[serde(deserialize_with = "optional_string_or_number")]
    pub username: Option<String>,
    #[serde(deserialize_with = "optional_string_or_number")]
    pub password: Option<String>,
    /// Max messages per second, 0 = unlimited
    pub rate: u32,
    pub queue_size: usize,
    #[serde(deserialize_with = "string_or_number")]
    pub topic_prefix: String,
    /// Leaf of the telemetry topic below the prefix
    #[serde(deserialize_with = "string_or_number")]
    pub device: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            client_id: "mqtt-nibe".to_string(),
            qos: 1,
            username: None,
            password: None,
            rate: 100,
            queue_size: 100,
            topic_prefix: "nibe-smos40".to_string(),
            device: "S2125".to_string(),
            keep_alive_secs: 30,
        }
    }
}

/// InfluxDB 1.x store holding the published defrost counter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    pub url: String,
    #[serde(
        default = "default_influx_database",
        deserialize_with = "string_or_number"
    )]
    pub database: String,
    #[serde(default = "default_influx_series", deserialize_with = "string_or_number")]
    pub series: String,
    #[serde(default = "default_influx_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_influx_database() -> String {
    "nibe".to_string()
}

fn default_influx_series() -> String {
    "nibe_s2125_mqtt".to_string()
}

fn default_influx_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Register metadata JSON, relative to the config file directory
    pub path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("smos40.json"),
        }
    }
}

/// Register driving the defrost counter and its payload key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefrostConfig {
    #[serde(deserialize_with = "string_or_number")]
    pub register: String,
    #[serde(deserialize_with = "string_or_number")]
    pub field: String,
}

impl Default for DefrostConfig {
    fn default() -> Self {
        Self {
            register: "31805".to_string(),
            field: "defrost_counter".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub modbus: ModbusConfig,
    pub mqtt: MqttConfig,
    /// No store configured when absent
    pub influxdb: Option<InfluxConfig>,
    pub catalog: CatalogConfig,
    /// Register ids polled each cycle, in order
    #[serde(deserialize_with = "strings_or_numbers")]
    pub registers: Vec<String>,
    pub defrost: DefrostConfig,
    pub logging: LoggingConfig,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl AppConfig {
    /// Load the YAML file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(NibeSrvError::config(format!(
                "configuration file {} not found",
                path.display()
            )));
        }

        let figment = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_figment(figment, base_dir)
    }

    /// Extract from an assembled figment
    pub fn from_figment(figment: Figment, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut config: AppConfig = figment.extract()?;
        config.base_dir = base_dir.into();
        Ok(config)
    }

    /// Register metadata path, resolved against the config directory
    pub fn catalog_path(&self) -> PathBuf {
        if self.catalog.path.is_absolute() {
            self.catalog.path.clone()
        } else {
            self.base_dir.join(&self.catalog.path)
        }
    }

    /// Primary telemetry topic
    pub fn telemetry_topic(&self) -> String {
        crate::publisher::join_topic(&[&self.mqtt.topic_prefix, &self.mqtt.device])
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.read_rate == 0 {
            return Err(NibeSrvError::config("service.read_rate must be greater than 0"));
        }
        if self.modbus.host.trim().is_empty() {
            return Err(NibeSrvError::config("modbus.host must be set"));
        }
        if self.mqtt.broker.trim().is_empty() {
            return Err(NibeSrvError::config("mqtt.broker must be set"));
        }
        if self.mqtt.qos > 2 {
            return Err(NibeSrvError::config(format!(
                "mqtt.qos must be 0, 1 or 2, got {}",
                self.mqtt.qos
            )));
        }
        if self.registers.is_empty() {
            return Err(NibeSrvError::config("registers must list at least one register id"));
        }
        for id in self.registers.iter().chain(std::iter::once(&self.defrost.register)) {
            decode_register_id(id)
                .map_err(|e| NibeSrvError::config(format!("invalid register list: {}", e)))?;
        }
        if let Some(influx) = &self.influxdb {
            if influx.url.trim().is_empty() {
                return Err(NibeSrvError::config("influxdb.url must be set"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn from_yaml(yaml: &str) -> AppConfig {
        AppConfig::from_figment(Figment::from(Yaml::string(yaml)), "/etc/nibesrv").unwrap()
    }

    const MINIMAL: &str = r#"
modbus:
  host: 192.168.1.16
registers: ["30001", "31805"]
"#;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = from_yaml(MINIMAL);
        assert_eq!(config.service.read_rate, 60);
        assert_eq!(config.modbus.port, 502);
        assert_eq!(config.modbus.timeout(), Duration::from_secs(1));
        assert_eq!(config.mqtt.client_id, "mqtt-nibe");
        assert_eq!(config.mqtt.qos, 1);
        assert_eq!(config.mqtt.rate, 100);
        assert_eq!(config.defrost.register, "31805");
        assert_eq!(config.defrost.field, "defrost_counter");
        assert!(config.influxdb.is_none());
        assert_eq!(config.telemetry_topic(), "nibe-smos40/S2125");
        config.validate().unwrap();
    }

    #[test]
    fn test_full_config() {
        let config = from_yaml(
            r#"
service:
  read_rate: 120
modbus:
  host: nibe.local
  unit_id: 3
mqtt:
  broker: 10.0.0.2
  topic_prefix: "heatpump//"
  device: "/S2125"
  username: user
  password: secret
influxdb:
  url: http://10.0.0.2:8084
registers: ["30001"]
catalog:
  path: /opt/nibe/smos40.json
"#,
        );
        assert_eq!(config.service.read_rate, 120);
        assert_eq!(config.modbus.unit_id, 3);
        assert_eq!(config.mqtt.username.as_deref(), Some("user"));
        assert_eq!(config.telemetry_topic(), "heatpump/S2125");

        let influx = config.influxdb.as_ref().unwrap();
        assert_eq!(influx.database, "nibe");
        assert_eq!(influx.series, "nibe_s2125_mqtt");
        assert_eq!(influx.timeout_ms, 1000);

        assert_eq!(config.catalog_path(), PathBuf::from("/opt/nibe/smos40.json"));
    }

    #[test]
    fn test_relative_catalog_path() {
        let config = from_yaml(MINIMAL);
        assert_eq!(
            config.catalog_path(),
            PathBuf::from("/etc/nibesrv/smos40.json")
        );
    }

    #[test]
    fn test_validation_failures() {
        let mut config = from_yaml(MINIMAL);
        config.service.read_rate = 0;
        assert!(config.validate().is_err());

        let mut config = from_yaml(MINIMAL);
        config.mqtt.qos = 3;
        assert!(config.validate().is_err());

        let mut config = from_yaml(MINIMAL);
        config.registers.clear();
        assert!(config.validate().is_err());

        let mut config = from_yaml(MINIMAL);
        config.registers.push("21805".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("21805"));

        let mut config = from_yaml(MINIMAL);
        config.modbus.host.clear();
        assert!(matches!(
            config.validate(),
            Err(NibeSrvError::ConfigError(_))
        ));
    }

    #[test]
    fn test_numeric_env_overrides_for_string_fields() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("nibesrv.yaml", MINIMAL)?;
            jail.set_env("NIBESRV_DEFROST__REGISTER", "31805");
            jail.set_env("NIBESRV_MQTT__PASSWORD", "12345");
            jail.set_env("NIBESRV_MQTT__CLIENT_ID", "4711");
            jail.set_env("NIBESRV_REGISTERS", "[30001, 31805]");
            jail.set_env("NIBESRV_MQTT__QOS", "2");

            let config = AppConfig::load("nibesrv.yaml").unwrap();
            assert_eq!(config.defrost.register, "31805");
            assert_eq!(config.mqtt.password.as_deref(), Some("12345"));
            assert_eq!(config.mqtt.client_id, "4711");
            assert_eq!(config.registers, vec!["30001", "31805"]);
            assert_eq!(config.mqtt.qos, 2);
            config.validate().unwrap();
            Ok(())
        });
    }

    #[test]
    fn test_unquoted_register_ids_in_yaml() {
        let config = from_yaml(
            r#"
modbus:
  host: 192.168.1.16
registers: [30001, "40011"]
defrost:
  register: 31805
"#,
        );
        assert_eq!(config.registers, vec!["30001", "40011"]);
        assert_eq!(config.defrost.register, "31805");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nibesrv.yaml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.registers, vec!["30001", "31805"]);
        assert_eq!(config.catalog_path(), dir.path().join("smos40.json"));

        let missing = AppConfig::load(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(missing, NibeSrvError::ConfigError(_)));
    }
}
