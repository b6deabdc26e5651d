//! # mbus-request - Reading M-Bus (Meter-Bus) Meters from Rust
//!
//! The mbus-request crate implements the master side of the wired M-Bus
//! (EN 13757-2/-3), the European standard for reading utility meters such as
//! electricity, gas, water and heat meters.
//!
//! ## Features
//!
//! - Frame codec for ACK, short, control and long frames with an explicit
//!   decode state machine that tells complete, incomplete and corrupt buffers apart
//! - Secondary address resolution with wildcard masks and collision narrowing
//! - Decoding of variable and fixed data responses into typed, scaled records
//! - Serial (tokio-serial) and TCP transports behind one async `Transport` trait
//! - Multi-telegram readouts with FCB toggling
//! - JSON output through serde
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mbus_request::{connect, request_data, DeviceAddress, SerialConfig};
//!
//! # async fn run() -> Result<(), mbus_request::MBusError> {
//! let handle = connect("/dev/ttyUSB0", &SerialConfig::default())?;
//! let address = DeviceAddress::parse("12345678FFFFFFFF")?;
//! let data = request_data(handle, &address).await?;
//! println!("{}", data.to_json()?);
//! # Ok(())
//! # }
//! ```
//!
//! Decoding a captured telegram needs no bus at all:
//!
//! ```rust
//! use mbus_request::{parse_frame, payload::decode_frame, DecodeOutcome};
//!
//! let bytes = [0x68, 0x03, 0x03, 0x68, 0x08, 0x01, 0x72, 0x7B, 0x16];
//! match parse_frame(&bytes) {
//!     DecodeOutcome::Complete { frame, consumed } => {
//!         assert_eq!(consumed, bytes.len());
//!         // a control frame carries no data header
//!         assert!(decode_frame(&frame).is_err());
//!     }
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

pub mod constants;
pub mod error;
pub mod logging;
pub mod mbus;
pub mod payload;
pub mod util;

pub use crate::error::{FrameError, MBusError};
pub use crate::logging::{init_logger, init_logger_with_debug};

// Core M-Bus types
pub use mbus::frame::{pack_frame, parse_frame, DecodeOutcome, MBusFrame, MBusFrameType};
pub use mbus::mbus_protocol::{DeviceAddress, MBusSession, SessionConfig};
pub use mbus::secondary_addressing::{is_secondary_address, ProbeResult, SecondaryAddress};
pub use mbus::serial::{MBusSerialHandle, SerialConfig};
pub use mbus::tcp::{MBusTcpHandle, TcpConfig};
pub use mbus::transport::{MBusHandle, Reception, Transport};
pub use payload::{FrameData, MBusRecord, MBusRecordValue, RecordFlags};

/// Connect to an M-Bus master via serial port.
///
/// # Arguments
/// * `port` - Serial port path (e.g., "/dev/ttyUSB0" on Linux, "COM3" on Windows)
/// * `config` - Baud rate and reply deadline
///
/// # Returns
/// * `Ok(MBusSerialHandle)` - Connected handle, usable as a [`Transport`]
/// * `Err(MBusError)` - The port could not be opened
pub fn connect(port: &str, config: &SerialConfig) -> Result<MBusSerialHandle, MBusError> {
    mbus::serial::connect_serial(port, config)
}

/// Connect to an M-Bus gateway via TCP.
///
/// # Arguments
/// * `config` - Host, port and reply deadline
///
/// # Returns
/// * `Ok(MBusTcpHandle)` - Connected handle, usable as a [`Transport`]
/// * `Err(MBusError)` - Connection failed
pub async fn connect_tcp(config: &TcpConfig) -> Result<MBusTcpHandle, MBusError> {
    mbus::tcp::connect_tcp(config).await
}

/// Read all data records of one slave.
///
/// # Arguments
/// * `transport` - Link to the bus
/// * `address` - Primary address or secondary address mask of the slave
///
/// # Returns
/// * `Ok(FrameData)` - Header and records of every telegram of the readout
/// * `Err(MBusError)` - Addressing, transmission or decoding failed
pub async fn request_data<T: Transport>(
    transport: T,
    address: &DeviceAddress,
) -> Result<FrameData, MBusError> {
    MBusSession::new(transport).read(address).await
}
