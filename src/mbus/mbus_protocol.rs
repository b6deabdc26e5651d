//! # M-Bus Protocol Implementation
//!
//! [`MBusSession`] drives one readout over a [`Transport`]: waking the bus
//! with SND_NKE, selecting a slave by secondary address when asked to, and
//! collecting REQ_UD2 responses until the slave reports no further telegrams.

use crate::constants::{MBUS_ADDRESS_NETWORK_LAYER, MBUS_ADDRESS_PRIMARY_MAX};
use crate::error::MBusError;
use crate::mbus::frame::{ping_frame, request_data_frame, MBusFrame};
use crate::mbus::secondary_addressing::{
    is_secondary_address, ProbeResult, Resolver, SecondaryAddress,
};
use crate::mbus::transport::{Reception, Transport};
use crate::payload::data::{decode_frame, extend, FrameData};

/// Represents the different states of a readout.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MBusProtocolState {
    Idle,
    Selecting,
    Requesting,
    Receiving,
    Error,
}

/// Session tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// SND_NKE broadcasts sent to the network layer before a secondary selection
    pub init_retries: usize,
    /// Upper bound on telegrams collected for one readout
    pub max_telegrams: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            init_retries: 2,
            max_telegrams: 16,
        }
    }
}

/// How a slave is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAddress {
    Primary(u8),
    Secondary(SecondaryAddress),
}

impl DeviceAddress {
    /// Parses a primary address (0-250) or a 16 digit secondary address mask.
    pub fn parse(value: &str) -> Result<Self, MBusError> {
        if is_secondary_address(value) {
            return Ok(DeviceAddress::Secondary(SecondaryAddress::from_mask(value)?));
        }
        match value.parse::<u8>() {
            Ok(address) if address <= MBUS_ADDRESS_PRIMARY_MAX => {
                Ok(DeviceAddress::Primary(address))
            }
            _ => Err(MBusError::InvalidSecondaryAddress(format!(
                "{value} is neither a primary address (0-{MBUS_ADDRESS_PRIMARY_MAX}) nor a 16 digit secondary address"
            ))),
        }
    }
}

/// One master talking to the slaves on a transport.
pub struct MBusSession<T: Transport> {
    transport: T,
    config: SessionConfig,
    state: MBusProtocolState,
}

impl<T: Transport> MBusSession<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    pub fn with_config(transport: T, config: SessionConfig) -> Self {
        MBusSession {
            transport,
            config,
            state: MBusProtocolState::Idle,
        }
    }

    pub fn state(&self) -> MBusProtocolState {
        self.state
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Sends SND_NKE to the network layer address so every slave drops a
    /// previous selection. Replies (or their absence) are ignored.
    pub async fn init_slaves(&mut self) -> Result<(), MBusError> {
        for _ in 0..self.config.init_retries {
            self.transport
                .send_frame(&ping_frame(MBUS_ADDRESS_NETWORK_LAYER))
                .await?;
            match self.transport.receive_frame().await? {
                Reception::Frame(frame) => {
                    log::debug!("SND_NKE answered with {:?}", frame.frame_type)
                }
                Reception::Collision => log::debug!("SND_NKE answered by several slaves"),
                Reception::Timeout => {}
            }
        }
        Ok(())
    }

    /// Selects the slave matching `mask`, narrowing wildcards if several match.
    pub async fn select_secondary(
        &mut self,
        mask: &SecondaryAddress,
    ) -> Result<ProbeResult, MBusError> {
        self.state = MBusProtocolState::Selecting;
        let result = Resolver::new(&mut self.transport).resolve(mask).await;
        self.state = match result {
            Ok(_) => MBusProtocolState::Idle,
            Err(_) => MBusProtocolState::Error,
        };
        result
    }

    async fn request_telegram(&mut self, address: u8, fcb: bool) -> Result<MBusFrame, MBusError> {
        self.state = MBusProtocolState::Requesting;
        self.transport
            .send_frame(&request_data_frame(address, fcb))
            .await?;

        self.state = MBusProtocolState::Receiving;
        match self.transport.receive_frame().await? {
            Reception::Frame(frame) if frame.is_ack() => Err(MBusError::FrameParseError(
                "slave acknowledged instead of answering with data".to_string(),
            )),
            Reception::Frame(frame) => Ok(frame),
            Reception::Timeout => Err(MBusError::Timeout),
            Reception::Collision => Err(MBusError::FrameParseError(
                "garbled response (collision?)".to_string(),
            )),
        }
    }

    /// Reads all telegrams of one slave.
    ///
    /// The FCB toggles between requests so the slave moves on to its next
    /// telegram; collection stops when a telegram no longer announces more
    /// records or after `max_telegrams`.
    pub async fn request_data(&mut self, address: u8) -> Result<FrameData, MBusError> {
        let result = self.collect_telegrams(address).await;
        self.state = if result.is_ok() {
            MBusProtocolState::Idle
        } else {
            MBusProtocolState::Error
        };
        result
    }

    async fn collect_telegrams(&mut self, address: u8) -> Result<FrameData, MBusError> {
        let mut fcb = false;
        let frame = self.request_telegram(address, fcb).await?;
        let mut data = decode_frame(&frame)?;
        let mut telegrams = 1;

        while data.more_records_follow {
            if telegrams >= self.config.max_telegrams {
                log::warn!(
                    "Stopping after {telegrams} telegrams although the slave has more records"
                );
                break;
            }
            fcb = !fcb;
            let frame = self.request_telegram(address, fcb).await?;
            if !frame.is_variable_data_response() {
                return Err(MBusError::UnsupportedControlInformation(
                    frame.control_information,
                ));
            }
            data = extend(data, &frame.data)?;
            telegrams += 1;
        }

        log::info!(
            "Read {} records in {telegrams} telegram(s) from address {address}",
            data.records.len()
        );
        Ok(data)
    }

    /// Full readout: resolves a secondary address if needed, then requests data.
    pub async fn read(&mut self, address: &DeviceAddress) -> Result<FrameData, MBusError> {
        let primary = match address {
            DeviceAddress::Primary(address) => *address,
            DeviceAddress::Secondary(mask) => {
                self.init_slaves().await?;
                match self.select_secondary(mask).await? {
                    ProbeResult::Single(found) => {
                        log::info!("Selected slave {found}");
                        MBUS_ADDRESS_NETWORK_LAYER
                    }
                    ProbeResult::Collision => {
                        return Err(MBusError::AddressingFailed(format!(
                            "address mask {mask} matches more than one device"
                        )))
                    }
                    ProbeResult::Nothing => {
                        return Err(MBusError::AddressingFailed(format!(
                            "address mask {mask} does not match any device"
                        )))
                    }
                }
            }
        };
        self.request_data(primary).await
    }
}
