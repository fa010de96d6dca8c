//! Unified error handling for the nibesrv gateway
//!
//! Service crates keep their own fine-grained error enums and convert into
//! [`GatewayError`] at the process boundary, so `main` has one error type to
//! report and one place that decides the exit code.

use thiserror::Error;

// ============================================================================
// GatewayError - Process-level error type
// ============================================================================

/// Process-level error type returned from service entry points
#[derive(Debug, Error)]
pub enum GatewayError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // Protocol & Communication Errors
    // ======================================
    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ======================================
    // Service & Runtime Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Another instance is already running: {0}")]
    AlreadyRunning(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using GatewayError
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Process exit code for this error
    ///
    /// Everything non-Ok exits with 1, as the service supervisor only
    /// distinguishes clean shutdown from failure.
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Whether the failure happened before polling started
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::InvalidConfig { .. }
                | Self::StartupFailed(_)
                | Self::AlreadyRunning(_)
                | Self::Deserialization(_)
        )
    }
}

// Conversion traits for common error types
impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::GatewayError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::GatewayError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! protocol_error {
    ($protocol:expr, $msg:expr) => {
        $crate::GatewayError::Protocol {
            protocol: $protocol.to_string(),
            message: $msg.to_string(),
        }
    };
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_config_error_macro() {
        let err = config_error!("read_rate must be > 0");
        assert_eq!(err.to_string(), "Configuration error: read_rate must be > 0");

        let err = config_error!("unknown register {}", "21805");
        assert_eq!(err.to_string(), "Configuration error: unknown register 21805");
        assert!(err.is_startup_error());
    }

    #[test]
    fn test_protocol_error_macro() {
        let err = protocol_error!("modbus", "illegal data address");
        assert_eq!(
            err.to_string(),
            "Protocol error: modbus: illegal data address"
        );
        assert!(!err.is_startup_error());
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_from_serde_json() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: GatewayError = parse_err.into();
        assert!(matches!(err, GatewayError::Serialization(_)));
    }
}
