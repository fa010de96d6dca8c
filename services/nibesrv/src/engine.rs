//! Poll cycle engine
//!
//! Drives the gateway: every cycle reads the configured registers one at a
//! time, scales them through the catalog, feeds the defrost tracker and
//! publishes the resulting snapshot. Outcomes of a single register read:
//!
//! - unknown register: skipped for this cycle
//! - transport returned nothing: the cycle is abandoned, nothing published
//! - reader error: polling stops and the shared token is cancelled

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::{RegisterCatalog, RegisterSpace};
use crate::config::AppConfig;
use crate::error::{NibeSrvError, Result};
use crate::publisher::{join_topic, Publisher};
use crate::reader::RegisterReader;
use crate::snapshot::PollSnapshot;
use crate::store::SeriesStore;
use crate::throttle::RateThrottle;
use crate::tracker::{CounterSource, DefrostCounterTracker};

/// Registers are always read one at a time
const READ_COUNT: u16 = 1;

/// What the engine needs from the configuration
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Register ids polled each cycle, in order
    pub registers: Arc<[String]>,
    pub reads_per_hour: u32,
    pub telemetry_topic: String,
    pub defrost_register: String,
    pub defrost_field: String,
    pub counter_source: CounterSource,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let series = config
            .influxdb
            .as_ref()
            .map(|influx| influx.series.clone())
            .unwrap_or_default();

        Self {
            registers: config.registers.iter().cloned().collect(),
            reads_per_hour: config.service.read_rate,
            telemetry_topic: config.telemetry_topic(),
            defrost_register: config.defrost.register.clone(),
            defrost_field: config.defrost.field.clone(),
            counter_source: CounterSource {
                series,
                field: config.defrost.field.clone(),
            },
        }
    }

    pub fn counter_topic(&self) -> String {
        join_topic(&[&self.telemetry_topic, "counter"])
    }
}

/// One successfully read register
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub display_name: String,
    pub raw: u16,
    pub value: f64,
}

/// Result of reading one configured register
#[derive(Debug)]
pub enum ReadOutcome {
    Value(Reading),
    /// Not in the catalog; continue with the next register
    Skip,
    /// No value from the transport; abandon the cycle
    AbortCycle,
    /// Unclassified reader failure; stop polling
    Fatal(NibeSrvError),
}

/// How a cycle ended, when it did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum CycleReport {
    /// Snapshot published; carries the cycle counter
    Published(u64),
    Aborted,
}

pub struct PollEngine {
    catalog: Arc<RegisterCatalog>,
    reader: Box<dyn RegisterReader>,
    publisher: Arc<dyn Publisher>,
    store: Option<Arc<dyn SeriesStore>>,
    tracker: DefrostCounterTracker,
    throttle: RateThrottle,
    settings: EngineSettings,
    cycle_counter: u64,
}

impl PollEngine {
    pub fn new(
        catalog: Arc<RegisterCatalog>,
        reader: Box<dyn RegisterReader>,
        publisher: Arc<dyn Publisher>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            catalog,
            reader,
            publisher,
            store: None,
            tracker: DefrostCounterTracker::new(),
            throttle: RateThrottle::new(settings.reads_per_hour),
            settings,
            cycle_counter: 0,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SeriesStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_throttle(mut self, throttle: RateThrottle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn cycle_counter(&self) -> u64 {
        self.cycle_counter
    }

    pub fn tracker(&self) -> &DefrostCounterTracker {
        &self.tracker
    }

    /// Try to seed the defrost counter; `false` without a store
    pub async fn reconcile_baseline(&mut self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        self.tracker
            .reconcile(store.as_ref(), &self.settings.counter_source)
            .await
    }

    /// Poll until `token` is cancelled
    ///
    /// Returns `Err` only for a fatal cycle error, after cancelling `token`.
    pub async fn run_forever(&mut self, token: CancellationToken) -> Result<()> {
        info!(
            "Polling {} registers, {} reads/hour ({:?} interval), publishing to {}",
            self.settings.registers.len(),
            self.settings.reads_per_hour,
            self.throttle.interval(),
            self.settings.telemetry_topic
        );
        if self.store.is_none() {
            info!("No time-series store configured, defrost counter will not be published");
        }
        self.reconcile_baseline().await;

        while self.throttle.wait_for_next_cycle(&token).await {
            match self.run_cycle().await {
                Ok(CycleReport::Published(cycle)) => debug!("Cycle {} published", cycle),
                Ok(CycleReport::Aborted) => debug!("Cycle abandoned, retrying next interval"),
                Err(e) => {
                    error!("Polling stopped on unexpected error: {}", e);
                    token.cancel();
                    return Err(e);
                },
            }
        }

        info!("Poll engine stopped after {} cycles", self.cycle_counter);
        Ok(())
    }

    /// Run one poll cycle
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let mut snapshot = PollSnapshot::new(Utc::now().timestamp());
        let mut defrost_raw = None;

        let catalog = Arc::clone(&self.catalog);
        let registers = Arc::clone(&self.settings.registers);
        for register_id in registers.iter() {
            match self.read_register(&catalog, register_id).await {
                ReadOutcome::Value(reading) => {
                    if *register_id == self.settings.defrost_register {
                        defrost_raw = Some(reading.raw);
                    }
                    snapshot.insert(reading.display_name, reading.value);
                },
                ReadOutcome::Skip => continue,
                ReadOutcome::AbortCycle => return Ok(CycleReport::Aborted),
                ReadOutcome::Fatal(e) => return Err(e),
            }
        }

        match defrost_raw {
            Some(raw) => self.tracker.observe(i64::from(raw)),
            None => warn!(
                "Defrost register {} not read this cycle, counter not updated",
                self.settings.defrost_register
            ),
        }
        if !self.tracker.baseline_established() {
            self.reconcile_baseline().await;
        }

        self.cycle_counter += 1;
        snapshot.cycle_counter = self.cycle_counter;
        snapshot.defrost_counter = self.tracker.published_count();
        self.publish(&snapshot).await?;

        Ok(CycleReport::Published(self.cycle_counter))
    }

    async fn read_register(
        &mut self,
        catalog: &RegisterCatalog,
        register_id: &str,
    ) -> ReadOutcome {
        let Some(descriptor) = catalog.get(register_id) else {
            warn!("Register {} not in catalog, skipped", register_id);
            return ReadOutcome::Skip;
        };

        let address = descriptor.address;
        let result = match descriptor.space {
            RegisterSpace::Coil => self.reader.read_coils(address, READ_COUNT).await,
            RegisterSpace::DiscreteInput => {
                self.reader.read_discrete_inputs(address, READ_COUNT).await
            },
            RegisterSpace::InputRegister => {
                self.reader.read_input_registers(address, READ_COUNT).await
            },
            RegisterSpace::HoldingRegister => {
                self.reader.read_holding_registers(address, READ_COUNT).await
            },
        };

        match result {
            Ok(Some(values)) => match values.first() {
                Some(&raw) => ReadOutcome::Value(Reading {
                    display_name: descriptor.display_name.clone(),
                    raw,
                    value: descriptor.scale(raw),
                }),
                None => {
                    warn!("Empty response for register {}, cycle abandoned", register_id);
                    ReadOutcome::AbortCycle
                },
            },
            Ok(None) => {
                warn!("No value for register {}, cycle abandoned", register_id);
                ReadOutcome::AbortCycle
            },
            Err(e) => ReadOutcome::Fatal(e),
        }
    }

    async fn publish(&mut self, snapshot: &PollSnapshot) -> Result<()> {
        let payload = snapshot.to_payload(&self.settings.defrost_field)?;
        if let Err(e) = self
            .publisher
            .publish(&self.settings.telemetry_topic, &payload, false)
            .await
        {
            warn!("Snapshot not published: {}", e);
        }

        let counter = snapshot.cycle_counter.to_string();
        if let Err(e) = self
            .publisher
            .publish(&self.settings.counter_topic(), &counter, false)
            .await
        {
            warn!("Cycle counter not published: {}", e);
        }
        Ok(())
    }
}
