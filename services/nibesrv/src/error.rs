//! Error handling for the heat-pump gateway service

use errors::GatewayError;
use thiserror::Error;

/// Gateway service error type
#[derive(Error, Debug, Clone)]
pub enum NibeSrvError {
    /// Register metadata missing, unreadable, or malformed
    #[error("Catalog load error: {0}")]
    CatalogLoadError(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Socket-level failures outside the soft-failure read path
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Publish/subscribe delivery errors
    #[error("Publish error: {0}")]
    PublishError(String),

    /// Time-series store errors (unreachable, bad response)
    #[error("Store error: {0}")]
    StoreError(String),

    /// Data handling errors (serialization, parsing, conversion)
    #[error("Data error: {0}")]
    DataError(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the gateway service
pub type Result<T> = std::result::Result<T, NibeSrvError>;

impl NibeSrvError {
    pub fn catalog(msg: impl Into<String>) -> Self {
        NibeSrvError::CatalogLoadError(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        NibeSrvError::ConfigError(msg.into())
    }

    pub fn publish(msg: impl Into<String>) -> Self {
        NibeSrvError::PublishError(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        NibeSrvError::StoreError(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        NibeSrvError::DataError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        NibeSrvError::InternalError(msg.into())
    }
}

/// Reasons a register-id string cannot be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterIdError {
    #[error("register id '{0}' is not a number")]
    NotNumeric(String),

    #[error("register id '{id}' has unsupported space selector '{selector}'")]
    UnknownSpace { id: String, selector: char },

    #[error("register id '{0}' has an address outside 0..=65535")]
    AddressOutOfRange(String),
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<RegisterIdError> for NibeSrvError {
    fn from(err: RegisterIdError) -> Self {
        NibeSrvError::CatalogLoadError(err.to_string())
    }
}

impl From<std::io::Error> for NibeSrvError {
    fn from(err: std::io::Error) -> Self {
        NibeSrvError::ConnectionError(err.to_string())
    }
}

impl From<serde_json::Error> for NibeSrvError {
    fn from(err: serde_json::Error) -> Self {
        NibeSrvError::DataError(err.to_string())
    }
}

impl From<figment::Error> for NibeSrvError {
    fn from(err: figment::Error) -> Self {
        NibeSrvError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for NibeSrvError {
    fn from(err: reqwest::Error) -> Self {
        NibeSrvError::StoreError(err.to_string())
    }
}

impl From<rumqttc::ClientError> for NibeSrvError {
    fn from(err: rumqttc::ClientError) -> Self {
        NibeSrvError::PublishError(err.to_string())
    }
}

impl From<NibeSrvError> for GatewayError {
    fn from(err: NibeSrvError) -> Self {
        match err {
            NibeSrvError::CatalogLoadError(msg) => {
                GatewayError::StartupFailed(format!("register catalog: {}", msg))
            },
            NibeSrvError::ConfigError(msg) => GatewayError::Configuration(msg),
            NibeSrvError::ConnectionError(msg) => GatewayError::ConnectionFailed {
                endpoint: "modbus".to_string(),
                reason: msg,
            },
            NibeSrvError::PublishError(msg) => GatewayError::ConnectionFailed {
                endpoint: "mqtt".to_string(),
                reason: msg,
            },
            NibeSrvError::StoreError(msg) => GatewayError::ConnectionFailed {
                endpoint: "influxdb".to_string(),
                reason: msg,
            },
            NibeSrvError::DataError(msg) => GatewayError::Serialization(msg),
            NibeSrvError::InternalError(msg) => GatewayError::Internal(msg),
        }
    }
}
