//! Nibe heat pump gateway (nibesrv)
//!
//! Polls the heat pump over Modbus TCP and republishes every cycle on MQTT.
//! Exit code 0 after a shutdown signal, 1 after a fatal error.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use errors::{GatewayError, GatewayResult};

use nibesrv::bootstrap::{self, Args, ServiceArgs, Startup};
use nibesrv::publisher::{join_topic, STATUS_OFFLINE};
use nibesrv::{
    AppConfig, EngineSettings, InfluxV1Store, ModbusTcpReader, MqttPublisher, PollEngine,
    Publisher, RegisterCatalog, SeriesStore,
};

/// Time given to the delivery task to flush the final status message
const STATUS_FLUSH_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> GatewayResult<()> {
    let args = Args::parse();
    let cli_log_level = args.log_level.clone();
    let mut service_args: ServiceArgs = args.into();
    let service_info = bootstrap::service_info();

    // Config first: it may name the log directory and level
    let config = AppConfig::load(&service_args.config_path);
    let log_dir = config.as_ref().ok().and_then(|c| c.logging.dir.clone());
    if let (None, Ok(config)) = (&cli_log_level, &config) {
        service_args.log_level = config.logging.level.clone();
    }

    bootstrap::initialize_logging(&service_args, &service_info, log_dir.as_deref())?;
    if !service_args.no_color {
        common::service_bootstrap::print_startup_banner(&service_info);
    }

    match bootstrap::prepare(&service_args, &service_info, config)? {
        Startup::Validated => Ok(()),
        Startup::Run {
            config,
            catalog,
            lock: _lock,
        } => run(config, catalog, &service_info.version).await,
    }
}

async fn run(config: AppConfig, catalog: RegisterCatalog, version: &str) -> GatewayResult<()> {
    let shutdown_token = CancellationToken::new();
    // Separate token so the final status can still go out after polling stops
    let mqtt_token = CancellationToken::new();

    let publisher = Arc::new(MqttPublisher::start(&config.mqtt, mqtt_token.clone()));
    let version_topic = join_topic(&[&config.mqtt.topic_prefix, "sw-version"]);
    if let Err(e) = publisher
        .publish(&version_topic, &format!("main={};mqtt=rumqttc", version), true)
        .await
    {
        warn!("Software version not published: {}", e);
    }

    let reader = ModbusTcpReader::new(&config.modbus);
    let mut engine = PollEngine::new(
        Arc::new(catalog),
        Box::new(reader),
        publisher.clone(),
        EngineSettings::from_config(&config),
    );
    if let Some(influx) = &config.influxdb {
        let store: Arc<dyn SeriesStore> = Arc::new(InfluxV1Store::new(influx)?);
        engine = engine.with_store(store);
    }

    let engine_token = shutdown_token.clone();
    let engine_handle = tokio::spawn(async move { engine.run_forever(engine_token).await });

    let signal = common::shutdown_on_signal(shutdown_token).await;

    let outcome = match engine_handle.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(GatewayError::from(e)),
        Err(e) => Err(GatewayError::Runtime(format!("poll task failed: {}", e))),
    };

    if let Err(e) = publisher.set_status(STATUS_OFFLINE).await {
        warn!("Offline status not published: {}", e);
    }
    tokio::time::sleep(STATUS_FLUSH_DELAY).await;
    match Arc::try_unwrap(publisher) {
        Ok(publisher) => publisher.shutdown().await,
        Err(_) => mqtt_token.cancel(),
    }

    match (&outcome, signal) {
        (Ok(()), Some(signal)) => info!("nibesrv stopped on {:?}", signal),
        (Ok(()), None) => info!("nibesrv stopped"),
        (Err(e), _) => error!("nibesrv stopped with error: {}", e),
    }
    outcome
}
