//! M-Bus over TCP (serial-to-Ethernet gateways).

use crate::error::MBusError;
use crate::mbus::transport::MBusHandle;
use std::time::Duration;
use tokio::net::TcpStream;

/// Address of a TCP gateway and the reply deadline on its bus.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
    /// Deadline for one reply
    pub timeout: Duration,
}

impl TcpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        TcpConfig {
            host: host.into(),
            port,
            timeout: Duration::from_secs(4),
        }
    }
}

pub type MBusTcpHandle = MBusHandle<TcpStream>;

/// Connects to the gateway; Nagle is disabled so requests leave at once.
pub async fn connect_tcp(config: &TcpConfig) -> Result<MBusTcpHandle, MBusError> {
    let stream = TcpStream::connect((config.host.as_str(), config.port))
        .await
        .map_err(|e| {
            MBusError::Io(std::io::Error::new(
                e.kind(),
                format!("{}:{}: {e}", config.host, config.port),
            ))
        })?;
    stream.set_nodelay(true)?;

    log::info!("Connected to {}:{}", config.host, config.port);
    Ok(MBusHandle::new(stream, config.timeout))
}
