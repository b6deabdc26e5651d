//! The mbus module contains the link layer of the M-Bus protocol: frame
//! packing and parsing, the byte transports (serial, TCP), secondary address
//! resolution and the request/response session.

pub mod frame;
pub mod mbus_protocol;
pub mod secondary_addressing;
pub mod serial;
pub mod tcp;
pub mod transport;

pub use frame::{parse_frame, pack_frame, DecodeOutcome};
pub use mbus_protocol::{DeviceAddress, MBusSession, SessionConfig};
pub use secondary_addressing::{ProbeResult, Resolver, SecondaryAddress};
pub use transport::{MBusHandle, Reception, Transport};

/// Represents an M-Bus frame.
pub use frame::MBusFrame;

/// Represents the different types of M-Bus frames.
pub use frame::MBusFrameType;
