//! Secondary Addressing Implementation for M-Bus (EN 13757-3)
//!
//! A secondary address is the 8 byte identity every slave carries in its data
//! header: identification number, manufacturer, version and medium. Written as
//! 16 hex digits (`IIIIIIIIMMMMVVDD`), any digit may be the wildcard `F`.
//!
//! Selecting by a mask addresses every slave that matches it. The [`Resolver`]
//! probes a mask and, when several slaves answer at once, narrows the
//! leftmost wildcard digit by digit until a single slave remains.

use crate::constants::{
    MBUS_ADDRESS_NETWORK_LAYER, MBUS_SECONDARY_ADDRESS_DIGITS, MBUS_SECONDARY_ADDRESS_WILDCARD,
};
use crate::error::MBusError;
use crate::mbus::frame::{request_data_frame, select_secondary_frame, MBusFrame};
use crate::mbus::transport::{Reception, Transport};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 16 digit secondary address or address mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecondaryAddress {
    digits: [u8; MBUS_SECONDARY_ADDRESS_DIGITS],
}

/// Returns `true` if `value` is a 16 digit hexadecimal secondary address mask.
pub fn is_secondary_address(value: &str) -> bool {
    value.len() == MBUS_SECONDARY_ADDRESS_DIGITS && value.chars().all(|c| c.is_ascii_hexdigit())
}

impl SecondaryAddress {
    /// The mask matching every slave.
    pub fn wildcard() -> Self {
        SecondaryAddress {
            digits: [MBUS_SECONDARY_ADDRESS_WILDCARD; MBUS_SECONDARY_ADDRESS_DIGITS],
        }
    }

    /// Parses a 16 digit hex mask; `F`/`f` is the wildcard.
    pub fn from_mask(mask: &str) -> Result<Self, MBusError> {
        if !is_secondary_address(mask) {
            return Err(MBusError::InvalidSecondaryAddress(mask.to_string()));
        }
        let mut digits = [0u8; MBUS_SECONDARY_ADDRESS_DIGITS];
        for (digit, c) in digits.iter_mut().zip(mask.chars()) {
            *digit = c
                .to_digit(16)
                .ok_or_else(|| MBusError::InvalidSecondaryAddress(mask.to_string()))?
                as u8;
        }
        Ok(SecondaryAddress { digits })
    }

    /// Reads an address from its 8 byte wire form (data header order).
    pub fn from_packed(packed: &[u8; 8]) -> Self {
        // identification number: little-endian BCD, most significant digit first in the mask
        let id = packed[..4].iter().rev();
        let manufacturer = [packed[5], packed[4]];
        let bytes = id.chain(manufacturer.iter()).chain(packed[6..].iter());

        let mut digits = [0u8; MBUS_SECONDARY_ADDRESS_DIGITS];
        for (pair, byte) in digits.chunks_mut(2).zip(bytes) {
            pair[0] = byte >> 4;
            pair[1] = byte & 0x0F;
        }
        SecondaryAddress { digits }
    }

    /// Reads an address from the start of a variable data response payload.
    pub fn from_header(payload: &[u8]) -> Result<Self, MBusError> {
        let packed: &[u8; 8] = payload
            .get(..8)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(MBusError::PrematureEndAtData)?;
        Ok(Self::from_packed(packed))
    }

    /// Combines the identification number at the start of a fixed data
    /// response payload with the remaining digits of `mask`.
    ///
    /// Fixed data carries no manufacturer, version or medium, so those
    /// positions keep whatever the mask specified, wildcards included.
    pub fn from_fixed_header(payload: &[u8], mask: &SecondaryAddress) -> Result<Self, MBusError> {
        let id = payload.get(..4).ok_or(MBusError::PrematureEndAtData)?;
        let mut digits = mask.digits;
        for (pair, byte) in digits[..8].chunks_mut(2).zip(id.iter().rev()) {
            pair[0] = byte >> 4;
            pair[1] = byte & 0x0F;
        }
        Ok(SecondaryAddress { digits })
    }

    /// 8 byte wire form used in the selection frame; wildcard nibbles stay `F`.
    pub fn pack(&self) -> [u8; 8] {
        let byte = |i: usize| (self.digits[2 * i] << 4) | self.digits[2 * i + 1];
        [
            byte(3),
            byte(2),
            byte(1),
            byte(0),
            byte(5),
            byte(4),
            byte(6),
            byte(7),
        ]
    }

    /// 16 upper-case hex digits, the same text `from_mask` accepts.
    pub fn to_mask(&self) -> String {
        self.to_string()
    }

    pub fn digits(&self) -> &[u8; MBUS_SECONDARY_ADDRESS_DIGITS] {
        &self.digits
    }

    /// Position of the leftmost wildcard digit.
    pub fn first_wildcard(&self) -> Option<usize> {
        self.digits
            .iter()
            .position(|&d| d == MBUS_SECONDARY_ADDRESS_WILDCARD)
    }

    pub fn has_wildcards(&self) -> bool {
        self.first_wildcard().is_some()
    }

    /// Copy with the digit at `position` replaced.
    pub fn with_digit(&self, position: usize, digit: u8) -> Self {
        let mut narrowed = *self;
        narrowed.digits[position] = digit & 0x0F;
        narrowed
    }

    /// Returns `true` if `address` matches this mask digit by digit.
    pub fn matches(&self, address: &SecondaryAddress) -> bool {
        self.digits
            .iter()
            .zip(address.digits.iter())
            .all(|(&mask, &digit)| mask == MBUS_SECONDARY_ADDRESS_WILDCARD || mask == digit)
    }
}

impl fmt::Display for SecondaryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for digit in self.digits {
            write!(f, "{digit:X}")?;
        }
        Ok(())
    }
}

impl FromStr for SecondaryAddress {
    type Err = MBusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_mask(s)
    }
}

impl Serialize for SecondaryAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// SND_UD selecting the slaves that match `mask`.
pub fn select_frame(mask: &SecondaryAddress) -> MBusFrame {
    select_secondary_frame(&mask.pack())
}

/// Classification of one selection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// Exactly one slave is selected; its full address.
    Single(SecondaryAddress),
    /// No slave answered.
    Nothing,
    /// More than one slave matches and they could not be told apart.
    Collision,
}

struct NarrowFrame {
    mask: SecondaryAddress,
    position: usize,
    next_digit: u8,
}

/// Resolves a secondary address mask to one slave.
///
/// The resolver only classifies replies. It never retries a transmission and
/// has no timeout policy of its own; both belong to the transport.
pub struct Resolver<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
}

impl<'a, T: Transport + ?Sized> Resolver<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Resolver { transport }
    }

    /// Sends one selection for `mask` and classifies the reply.
    ///
    /// When the mask still contains wildcards, a selected slave is asked for
    /// its data so the full address can be read from the response header.
    pub async fn probe(&mut self, mask: &SecondaryAddress) -> Result<ProbeResult, MBusError> {
        log::debug!("Probing secondary address {mask}");
        self.transport.send_frame(&select_frame(mask)).await?;

        match self.transport.receive_frame().await? {
            Reception::Timeout => Ok(ProbeResult::Nothing),
            Reception::Collision => Ok(ProbeResult::Collision),
            Reception::Frame(frame) if frame.is_ack() => {
                if mask.has_wildcards() {
                    self.read_selected_address(mask).await
                } else {
                    Ok(ProbeResult::Single(*mask))
                }
            }
            Reception::Frame(frame) => {
                log::debug!("Unexpected {:?} frame in reply to selection", frame.frame_type);
                Ok(ProbeResult::Collision)
            }
        }
    }

    async fn read_selected_address(
        &mut self,
        mask: &SecondaryAddress,
    ) -> Result<ProbeResult, MBusError> {
        self.transport
            .send_frame(&request_data_frame(MBUS_ADDRESS_NETWORK_LAYER, false))
            .await?;

        match self.transport.receive_frame().await? {
            Reception::Frame(frame) if frame.is_variable_data_response() => {
                let address = SecondaryAddress::from_header(&frame.data)?;
                log::info!("Found slave with secondary address {address}");
                Ok(ProbeResult::Single(address))
            }
            Reception::Frame(frame) if frame.is_fixed_data_response() => {
                let address = SecondaryAddress::from_fixed_header(&frame.data, mask)?;
                log::info!("Found slave with identification {address} (fixed data)");
                Ok(ProbeResult::Single(address))
            }
            Reception::Frame(frame) => Err(MBusError::AddressingFailed(format!(
                "selected slave answered with CI 0x{:02X}",
                frame.control_information
            ))),
            Reception::Collision => Ok(ProbeResult::Collision),
            Reception::Timeout => Err(MBusError::Timeout),
        }
    }

    /// Resolves `mask` to a single slave.
    ///
    /// A mask that collides is narrowed at its leftmost wildcard with the
    /// digits 0 to 9, depth first; the first single match wins. If every
    /// branch is silent or collides in turn, the ambiguity is reported as
    /// `Collision`.
    pub async fn resolve(&mut self, mask: &SecondaryAddress) -> Result<ProbeResult, MBusError> {
        match self.probe(mask).await? {
            ProbeResult::Collision => {}
            other => return Ok(other),
        }

        let Some(position) = mask.first_wildcard() else {
            log::warn!("Fully specified address {mask} matches several slaves");
            return Ok(ProbeResult::Collision);
        };

        let mut stack = vec![NarrowFrame {
            mask: *mask,
            position,
            next_digit: 0,
        }];

        while let Some(top) = stack.last_mut() {
            if top.next_digit > 9 {
                stack.pop();
                continue;
            }
            let candidate = top.mask.with_digit(top.position, top.next_digit);
            top.next_digit += 1;

            match self.probe(&candidate).await? {
                ProbeResult::Single(address) => return Ok(ProbeResult::Single(address)),
                ProbeResult::Nothing => {}
                ProbeResult::Collision => match candidate.first_wildcard() {
                    Some(position) => stack.push(NarrowFrame {
                        mask: candidate,
                        position,
                        next_digit: 0,
                    }),
                    None => {
                        log::warn!("Fully specified address {candidate} matches several slaves")
                    }
                },
            }
        }

        Ok(ProbeResult::Collision)
    }
}
