//! Service bootstrap utilities
//!
//! Startup banner, logging initialization, and development environment
//! loading shared by gateway binaries.

use crate::bootstrap_args::ServiceArgs;
use crate::logging::{self, LogConfig};
use tracing::info;

/// Service metadata for startup
pub struct ServiceInfo {
    /// Service name (e.g., "nibesrv")
    pub name: String,
    /// Service version from Cargo.toml
    pub version: String,
    /// Service description
    pub description: String,
}

impl ServiceInfo {
    /// Create new service info
    ///
    /// `version` is passed in by the binary so it reports its own
    /// `CARGO_PKG_VERSION`, not this crate's.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

/// Print startup banner
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
 ███╗   ██╗██╗██████╗ ███████╗███████╗██████╗ ██╗   ██╗
 ████╗  ██║██║██╔══██╗██╔════╝██╔════╝██╔══██╗██║   ██║
 ██╔██╗ ██║██║██████╔╝█████╗  ███████╗██████╔╝██║   ██║
 ██║╚██╗██║██║██╔══██╗██╔══╝  ╚════██║██╔══██╗╚██╗ ██╔╝
 ██║ ╚████║██║██████╔╝███████╗███████║██║  ██║ ╚████╔╝
 ╚═╝  ╚═══╝╚═╝╚═════╝ ╚══════╝╚══════╝╚═╝  ╚═╝  ╚═══╝
            "#;

    info!("{}", banner);
    info!("");
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!("");
}

/// Initialize logging for a service
///
/// Log root directory priority:
/// 1. NIBESRV_LOG_DIR environment variable
/// 2. `log_dir` from the YAML config
/// 3. Default "logs"
pub fn init_logging(
    service: &ServiceInfo,
    args: &ServiceArgs,
    log_dir: Option<&str>,
) -> anyhow::Result<()> {
    logging::init_log_root(log_dir);

    let log_config = LogConfig {
        service_name: service.name.clone(),
        log_dir: logging::get_log_root().join(&service.name),
        console_level: args.parse_log_level(),
        enable_json: false,
        ansi: !args.no_color,
        ..Default::default()
    };

    logging::init_with_config(log_config).map_err(|e| anyhow::anyhow!("{}", e))?;

    Ok(())
}

/// Load environment variables in development mode
///
/// In debug builds, reads a `.env` file and sets variables that are not
/// already set. In release builds this is a no-op.
pub fn load_development_env() {
    #[cfg(debug_assertions)]
    {
        if let Ok(content) = std::fs::read_to_string(".env") {
            for (key, value) in parse_env_lines(&content) {
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }
}

/// Parse `KEY=VALUE` lines, skipping comments and blank lines
fn parse_env_lines(content: &str) -> Vec<(&str, &str)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_lines() {
        let content = "# comment\nNIBESRV_MQTT__BROKER = 10.0.0.2\n\nRUST_LOG=debug\nbroken line\n";
        let pairs = parse_env_lines(content);
        assert_eq!(
            pairs,
            vec![("NIBESRV_MQTT__BROKER", "10.0.0.2"), ("RUST_LOG", "debug")]
        );
    }

    #[test]
    fn test_service_info_new() {
        let info = ServiceInfo::new("nibesrv", "1.2.3", "Heat pump gateway");
        assert_eq!(info.name, "nibesrv");
        assert_eq!(info.version, "1.2.3");
    }
}
