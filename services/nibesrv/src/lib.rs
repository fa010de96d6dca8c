//! Heat pump gateway library (nibesrv)
//!
//! Polls a Nibe S-series heat pump over Modbus TCP, scales the raw register
//! values with the register description, derives a defrost counter and
//! republishes every cycle as one JSON message on MQTT.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │ RegisterReader  │───►│   PollEngine    │───►│   Publisher     │
//! │ (Modbus TCP)    │    │ catalog/tracker │    │   (MQTT)        │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!                                 ▲
//!                                 │ last defrost counter
//!                        ┌─────────────────┐
//!                        │  SeriesStore    │
//!                        │  (InfluxDB 1.x) │
//!                        └─────────────────┘
//! ```
//!
//! - **`catalog`**: register id decoding, name normalization, scale factors
//! - **`engine`**: the poll cycle and its outcome policy
//! - **`tracker`**: defrost edge counter seeded from the store
//! - **`throttle`**: reads-per-hour pacing, cancellable
//! - **`reader`**, **`publisher`**, **`store`**: boundaries and their adapters
//!
//! # Topics
//!
//! ```text
//! <prefix>/<device>          snapshot JSON, sorted keys
//! <prefix>/<device>/counter  cycle counter
//! <prefix>/status            online | offline (retained, last will)
//! <prefix>/sw-version        main=<version>;mqtt=rumqttc (retained)
//! ```

pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod publisher;
pub mod reader;
pub mod serde_helpers;
pub mod snapshot;
pub mod store;
pub mod throttle;
pub mod tracker;

pub use catalog::{RegisterCatalog, RegisterDescriptor, RegisterSpace};
pub use config::AppConfig;
pub use engine::{CycleReport, EngineSettings, PollEngine, ReadOutcome};
pub use error::{NibeSrvError, Result};
pub use publisher::{MqttPublisher, Publisher};
pub use reader::{ModbusTcpReader, RegisterReader};
pub use store::{InfluxV1Store, SeriesStore};
pub use throttle::RateThrottle;
pub use tracker::DefrostCounterTracker;
