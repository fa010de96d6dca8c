//! Service bootstrap
//!
//! Command-line parsing, logging setup and the `--validate` summary.
//! Uses common bootstrap utilities for shared functionality.

use clap::Parser;
use tracing::{error, info, warn};

use common::service_bootstrap::ServiceInfo;
use common::InstanceLock;
use errors::{GatewayError, GatewayResult};

use crate::catalog::RegisterCatalog;
use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};
use crate::error::Result;

pub use common::bootstrap_args::ServiceArgs;

/// Command-line arguments for nibesrv
#[derive(Parser, Clone, Debug)]
#[command(
    name = "nibesrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Nibe heat pump Modbus to MQTT gateway",
    long_about = None
)]
pub struct Args {
    /// Configuration file
    #[arg(
        short = 'c',
        long = "config",
        default_value = DEFAULT_CONFIG_PATH,
        env = "NIBESRV_CONFIG"
    )]
    pub config: String,

    /// Log level (trace, debug, info, warn, error); overrides `logging.level`
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

impl From<Args> for ServiceArgs {
    fn from(args: Args) -> Self {
        ServiceArgs {
            log_level: args.log_level.unwrap_or_else(|| "info".to_string()),
            config_path: args.config,
            no_color: args.no_color,
            validate: args.validate,
        }
    }
}

pub fn service_info() -> ServiceInfo {
    ServiceInfo::new(
        "nibesrv",
        env!("CARGO_PKG_VERSION"),
        "Nibe S2125 Modbus to MQTT gateway",
    )
}

/// Initialize logging system with command-line arguments
///
/// Log root directory priority:
/// 1. NIBESRV_LOG_DIR environment variable
/// 2. `log_dir` argument (from `logging.dir` when known)
/// 3. Default "logs"
pub fn initialize_logging(
    args: &ServiceArgs,
    service_info: &ServiceInfo,
    log_dir: Option<&str>,
) -> GatewayResult<()> {
    // Load environment variables from .env file in development mode
    common::service_bootstrap::load_development_env();

    common::service_bootstrap::init_logging(service_info, args, log_dir)
        .map_err(|e| GatewayError::Configuration(format!("Failed to init logging: {}", e)))
}

/// Outcome of the start-up checks
pub enum Startup {
    /// `--validate` run finished, nothing to start
    Validated,
    /// Ready to poll; `lock` must live as long as the service
    Run {
        config: AppConfig,
        catalog: RegisterCatalog,
        lock: InstanceLock,
    },
}

/// Check the configuration, load the catalog and take the instance lock
///
/// A `--validate` run returns before locking, so it works next to a running
/// service.
pub fn prepare(
    args: &ServiceArgs,
    service_info: &ServiceInfo,
    config: Result<AppConfig>,
) -> GatewayResult<Startup> {
    let config = config.map_err(|e| {
        error!("Failed to load {}: {}", args.config_path, e);
        GatewayError::from(e)
    })?;
    config.validate().map_err(|e| {
        error!("Invalid configuration: {}", e);
        GatewayError::from(e)
    })?;

    let catalog = RegisterCatalog::load(config.catalog_path()).map_err(|e| {
        error!("{}", e);
        GatewayError::from(e)
    })?;

    if args.validate {
        log_validation_summary(&config, &catalog);
        info!("Validation completed successfully");
        return Ok(Startup::Validated);
    }

    let lock = InstanceLock::acquire(&service_info.name).map_err(|e| {
        error!("{} already running, exiting: {}", service_info.name, e);
        GatewayError::AlreadyRunning(service_info.name.clone())
    })?;

    Ok(Startup::Run {
        config,
        catalog,
        lock,
    })
}

/// Log what a `--validate` run found
pub fn log_validation_summary(config: &AppConfig, catalog: &RegisterCatalog) {
    info!("Service: {}", config.service.name);
    info!(
        "Modbus: {}:{} unit {}",
        config.modbus.host, config.modbus.port, config.modbus.unit_id
    );
    info!(
        "MQTT: {}:{} topic {}",
        config.mqtt.broker,
        config.mqtt.port,
        config.telemetry_topic()
    );
    match &config.influxdb {
        Some(influx) => info!(
            "InfluxDB: {} db={} series={}",
            influx.url, influx.database, influx.series
        ),
        None => info!("InfluxDB: not configured"),
    }
    info!(
        "Catalog: {} registers from {}",
        catalog.len(),
        config.catalog_path().display()
    );

    let unknown: Vec<&str> = config
        .registers
        .iter()
        .filter(|id| catalog.get(id).is_none())
        .map(String::as_str)
        .collect();
    info!(
        "Polling {} registers at {} reads/hour",
        config.registers.len(),
        config.service.read_rate
    );
    if !unknown.is_empty() {
        warn!(
            "Registers not in catalog (skipped at runtime): {}",
            unknown.join(", ")
        );
    }
}
