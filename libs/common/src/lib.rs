//! Shared service plumbing for the nibesrv gateway
//!
//! Provides functions used by gateway binaries, including:
//! - logging setup (console + daily rolling file)
//! - signal-driven graceful shutdown
//! - startup banner and service bootstrap
//! - single-instance locking

pub mod bootstrap_args;
pub mod instance_lock;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use instance_lock::InstanceLock;
pub use service_bootstrap::ServiceInfo;
pub use shutdown::{shutdown_on_signal, wait_for_shutdown, ShutdownSignal};
