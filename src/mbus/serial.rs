//! # M-Bus Serial Communication
//!
//! Opens a serial M-Bus master (level converter) as a [`Transport`]. The line
//! runs 8 data bits, even parity, one stop bit; the reply deadline depends on
//! the baud rate.
//!
//! [`Transport`]: crate::mbus::transport::Transport

use crate::error::MBusError;
use crate::mbus::transport::MBusHandle;
use std::time::Duration;
use tokio_serial::SerialPortBuilderExt;

/// Configuration for serial connection.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baudrate: u32,
    /// Deadline for one reply; derived from the baud rate when `None`
    pub timeout: Option<Duration>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            baudrate: 9600,
            timeout: None,
        }
    }
}

impl SerialConfig {
    pub fn with_baudrate(baudrate: u32) -> Self {
        SerialConfig {
            baudrate,
            ..Default::default()
        }
    }

    /// Reply deadline: roughly the transmission time of a long frame plus
    /// the slave's response delay at this baud rate.
    pub fn response_timeout(&self) -> Duration {
        if let Some(timeout) = self.timeout {
            return timeout;
        }
        match self.baudrate {
            300 => Duration::from_millis(1300),
            600 => Duration::from_millis(800),
            1200 => Duration::from_millis(500),
            2400 => Duration::from_millis(300),
            4800 => Duration::from_millis(300),
            9600 => Duration::from_millis(200),
            19200 => Duration::from_millis(200),
            38400 => Duration::from_millis(200),
            _ => Duration::from_millis(500),
        }
    }
}

/// Serial M-Bus link.
pub type MBusSerialHandle = MBusHandle<tokio_serial::SerialStream>;

/// Opens `port_name` with the given configuration.
pub fn connect_serial(
    port_name: &str,
    config: &SerialConfig,
) -> Result<MBusSerialHandle, MBusError> {
    let port = tokio_serial::new(port_name, config.baudrate)
        .data_bits(tokio_serial::DataBits::Eight)
        .stop_bits(tokio_serial::StopBits::One)
        .parity(tokio_serial::Parity::Even)
        .open_native_async()
        .map_err(|e| MBusError::SerialPortError(format!("{port_name}: {e}")))?;

    log::info!("Opened {port_name} at {} baud", config.baudrate);
    Ok(MBusHandle::new(port, config.response_timeout()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SerialConfig::default();
        assert_eq!(config.baudrate, 9600);
        assert_eq!(config.response_timeout(), Duration::from_millis(200));
    }

    #[test]
    fn test_timeout_by_baudrate() {
        assert_eq!(
            SerialConfig::with_baudrate(300).response_timeout(),
            Duration::from_millis(1300)
        );
        assert_eq!(
            SerialConfig::with_baudrate(9600).response_timeout(),
            Duration::from_millis(200)
        );
        assert_eq!(
            SerialConfig::with_baudrate(115200).response_timeout(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_explicit_timeout_wins() {
        let config = SerialConfig {
            baudrate: 300,
            timeout: Some(Duration::from_secs(2)),
        };
        assert_eq!(config.response_timeout(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_missing_port() {
        let result = connect_serial("/dev/does-not-exist-mbus", &SerialConfig::default());
        assert!(matches!(result, Err(MBusError::SerialPortError(_))));
    }
}
