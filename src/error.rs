//! # M-Bus Error Handling
//!
//! This module defines the MBusError enum, which represents the different error
//! types that can occur in the mbus-request crate.
//!
//! Expected protocol conditions (a truncated buffer, a silent bus, a collision
//! on the bus) are not errors; they are reported through dedicated outcome
//! types in the modules that produce them.

use thiserror::Error;

/// Reason a byte buffer was rejected by the frame codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The first byte is none of 0xE5, 0x10 or 0x68.
    #[error("Invalid start byte: 0x{0:02X}")]
    InvalidStartByte(u8),

    /// The second 0x68 of a long frame header is missing.
    #[error("Invalid second start byte: 0x{0:02X}")]
    InvalidSecondStartByte(u8),

    /// The two L-fields of a long frame differ, or L is below 3.
    #[error("Length field mismatch: {first} / {second}")]
    LengthMismatch { first: u8, second: u8 },

    /// The frame checksum does not match its content.
    #[error("Invalid checksum: expected 0x{expected:02X}, calculated 0x{calculated:02X}")]
    InvalidChecksum { expected: u8, calculated: u8 },

    /// The frame is not terminated by 0x16.
    #[error("Invalid stop byte: 0x{0:02X}")]
    InvalidStopByte(u8),
}

/// Represents the different error types that can occur in the M-Bus crate.
#[derive(Debug, Error)]
pub enum MBusError {
    /// Indicates an error related to the serial port communication.
    #[error("Serial port error: {0}")]
    SerialPortError(String),

    /// Indicates an I/O failure on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No complete frame arrived before the receive deadline.
    #[error("Timeout waiting for response")]
    Timeout,

    /// Indicates a malformed link layer frame.
    #[error("Malformed frame: {0}")]
    Frame(#[from] FrameError),

    /// Indicates an error when parsing an M-Bus frame.
    #[error("Error parsing M-Bus frame: {0}")]
    FrameParseError(String),

    /// The frame carries a CI field this crate does not decode.
    #[error("Unsupported control information: 0x{0:02X}")]
    UnsupportedControlInformation(u8),

    /// Indicates an unknown DIF.
    #[error("Unknown DIF: 0x{0:02X}")]
    UnknownDif(u8),

    /// More DIFE bytes than a data information block may hold.
    #[error("DIF chain too long")]
    DifChainTooLong,

    /// More VIFE bytes than a value information block may hold.
    #[error("VIF chain too long")]
    VifChainTooLong,

    /// A BCD field holds a nibble outside 0-9.
    #[error("Invalid BCD digit in byte 0x{0:02X}")]
    InvalidBcd(u8),

    /// Indicates a premature end of data.
    #[error("Premature end of data")]
    PrematureEndAtData,

    /// Indicates a nom parsing error.
    #[error("Nom error: {0}")]
    NomError(String),

    /// Indicates an invalid hexadecimal string was provided.
    #[error("Invalid hexadecimal string")]
    InvalidHexString,

    /// A secondary address mask is not 16 hex digits.
    #[error("Invalid secondary address: {0}")]
    InvalidSecondaryAddress(String),

    /// Indicates an invalid manufacturer ID.
    #[error("Invalid manufacturer")]
    InvalidManufacturer,

    /// The slave answered with a general application error (CI 0x70).
    #[error("Application error {code}: {description}")]
    ApplicationError { code: u8, description: String },

    /// Selecting a device by secondary address did not yield exactly one device.
    #[error("Secondary addressing failed: {0}")]
    AddressingFailed(String),

    /// A catch‑all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}

impl<I: std::fmt::Debug> From<nom::Err<nom::error::Error<I>>> for MBusError {
    fn from(err: nom::Err<nom::error::Error<I>>) -> Self {
        match err {
            nom::Err::Incomplete(_) => MBusError::PrematureEndAtData,
            nom::Err::Error(e) | nom::Err::Failure(e) if e.code == nom::error::ErrorKind::Eof => {
                MBusError::PrematureEndAtData
            }
            other => MBusError::NomError(format!("{other:?}")),
        }
    }
}
