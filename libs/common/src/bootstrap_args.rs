//! Common command-line arguments for gateway services
//!
//! Binaries define their own clap `Args` and convert into [`ServiceArgs`],
//! which is what the shared bootstrap code consumes.

/// Common service startup arguments
#[derive(Debug, Clone)]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Path of the YAML configuration file
    pub config_path: String,

    /// Disable colored output (useful for log files)
    pub no_color: bool,

    /// Only validate configuration without starting service
    pub validate: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            config_path: "config/nibesrv.yaml".to_string(),
            no_color: false,
            validate: false,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" | "critical" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.log_level == "debug" || self.log_level == "trace"
    }
}
