//! Protocol reader
//!
//! [`RegisterReader`] is the boundary the poll engine reads through: one
//! operation per register space, each returning the raw values or `None`
//! when the transport could not produce them. `Err` is reserved for
//! conditions the reader cannot classify, which the engine escalates.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

use crate::catalog::RegisterSpace;
use crate::config::ModbusConfig;
use crate::error::Result;

/// Typed register reads against the heat-pump controller
#[async_trait]
pub trait RegisterReader: Send {
    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Option<Vec<u16>>>;

    async fn read_discrete_inputs(&mut self, address: u16, count: u16)
        -> Result<Option<Vec<u16>>>;

    async fn read_input_registers(&mut self, address: u16, count: u16)
        -> Result<Option<Vec<u16>>>;

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Option<Vec<u16>>>;
}

/// Modbus TCP reader for a single controller
///
/// Connects lazily on the first read and after every transport failure.
pub struct ModbusTcpReader {
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
    ctx: Option<Context>,
}

impl ModbusTcpReader {
    pub fn new(config: &ModbusConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            unit_id: config.unit_id,
            timeout: config.timeout(),
            ctx: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    async fn resolve(host: String, port: u16) -> Option<SocketAddr> {
        match tokio::net::lookup_host((host.as_str(), port)).await {
            Ok(mut addrs) => addrs.next(),
            Err(e) => {
                warn!("Cannot resolve Modbus host {}: {}", host, e);
                None
            },
        }
    }

    async fn ensure_connected(&mut self) -> bool {
        if self.ctx.is_some() {
            return true;
        }

        let Some(socket_addr) = Self::resolve(self.host.clone(), self.port).await else {
            return false;
        };

        debug!("Connecting to Modbus TCP server at {}", socket_addr);
        match timeout(
            self.timeout,
            tcp::connect_slave(socket_addr, Slave(self.unit_id)),
        )
        .await
        {
            Ok(Ok(ctx)) => {
                info!(
                    "Connected to Modbus TCP server at {} (unit {})",
                    socket_addr, self.unit_id
                );
                self.ctx = Some(ctx);
                true
            },
            Ok(Err(e)) => {
                warn!("Failed to connect to Modbus TCP server {}: {}", socket_addr, e);
                false
            },
            Err(_) => {
                warn!(
                    "Connection to Modbus TCP server {} timed out after {:?}",
                    socket_addr, self.timeout
                );
                false
            },
        }
    }

    async fn read(
        &mut self,
        space: RegisterSpace,
        address: u16,
        count: u16,
    ) -> Result<Option<Vec<u16>>> {
        if !self.ensure_connected().await {
            return Ok(None);
        }
        let Some(ctx) = self.ctx.as_mut() else {
            return Ok(None);
        };

        let limit = self.timeout;
        let response = match space {
            RegisterSpace::Coil => timeout(limit, ctx.read_coils(address, count))
                .await
                .map(|r| r.map(|r| r.map(bits_to_words))),
            RegisterSpace::DiscreteInput => {
                timeout(limit, ctx.read_discrete_inputs(address, count))
                    .await
                    .map(|r| r.map(|r| r.map(bits_to_words)))
            },
            RegisterSpace::InputRegister => {
                timeout(limit, ctx.read_input_registers(address, count)).await
            },
            RegisterSpace::HoldingRegister => {
                timeout(limit, ctx.read_holding_registers(address, count)).await
            },
        };

        match response {
            Ok(Ok(Ok(values))) => Ok(Some(values)),
            Ok(Ok(Err(exception))) => {
                warn!(
                    "Modbus exception reading {} {}: {:?}",
                    space, address, exception
                );
                Ok(None)
            },
            Ok(Err(e)) => {
                warn!("Modbus transport error reading {} {}: {}", space, address, e);
                self.ctx = None;
                Ok(None)
            },
            Err(_) => {
                warn!(
                    "Modbus read of {} {} timed out after {:?}",
                    space, address, limit
                );
                self.ctx = None;
                Ok(None)
            },
        }
    }
}

#[async_trait]
impl RegisterReader for ModbusTcpReader {
    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Option<Vec<u16>>> {
        self.read(RegisterSpace::Coil, address, count).await
    }

    async fn read_discrete_inputs(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Option<Vec<u16>>> {
        self.read(RegisterSpace::DiscreteInput, address, count).await
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Option<Vec<u16>>> {
        self.read(RegisterSpace::InputRegister, address, count).await
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Option<Vec<u16>>> {
        self.read(RegisterSpace::HoldingRegister, address, count).await
    }
}

fn bits_to_words(bits: Vec<bool>) -> Vec<u16> {
    bits.into_iter().map(u16::from).collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tracing_test::traced_test;

    fn config(port: u16, timeout_ms: u64) -> ModbusConfig {
        ModbusConfig {
            host: "127.0.0.1".to_string(),
            port,
            unit_id: 1,
            timeout_ms,
        }
    }

    #[test]
    fn test_bits_to_words() {
        assert_eq!(bits_to_words(vec![true, false, true]), vec![1, 0, 1]);
        assert!(bits_to_words(Vec::new()).is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_refused_connection_is_soft_failure() {
        // Grab a free port, then close it
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut reader = ModbusTcpReader::new(&config(port, 500));
        let result = reader.read_input_registers(1, 1).await.unwrap();
        assert!(result.is_none());
        assert!(!reader.is_connected());
        assert!(logs_contain("Failed to connect"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept and hold the socket without ever answering
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let mut reader = ModbusTcpReader::new(&config(port, 200));
        let result = reader.read_holding_registers(11, 1).await.unwrap();
        assert!(result.is_none());
        assert!(!reader.is_connected());
        assert!(logs_contain("timed out"));

        server.abort();
    }
}
