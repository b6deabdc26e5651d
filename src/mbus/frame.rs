//! # M-Bus Frame Codec
//!
//! This module encodes and decodes the Meter-Bus (M-Bus) link layer frames defined in
//! EN 13757-2. Four frame shapes exist on the wire:
//!
//! | Frame   | Bytes                                    | Checksum over   |
//! |---------|------------------------------------------|-----------------|
//! | Ack     | `E5`                                     | -               |
//! | Short   | `10 C A CS 16`                           | C, A            |
//! | Control | `68 03 03 68 C A CI CS 16`               | C, A, CI        |
//! | Long    | `68 L L 68 C A CI data.. CS 16`          | C, A, CI, data  |
//!
//! ## Features
//! - Pack frames into bytes, computing L-fields and checksums.
//! - Decode a byte buffer with an explicit state machine that distinguishes a
//!   complete frame, a valid-so-far prefix (`NeedMoreBytes`) and a corrupt
//!   buffer (`Malformed`).
//! - Fixed helper frames for SND_NKE (ping), REQ_UD2 (request data) and the
//!   secondary address selection.
//!
//! ## Usage
//!
//! ```rust
//! use mbus_request::mbus::frame::{pack_frame, parse_frame, request_data_frame, DecodeOutcome};
//!
//! let bytes = pack_frame(&request_data_frame(0x01, false)).unwrap();
//! assert_eq!(bytes, vec![0x10, 0x5B, 0x01, 0x5C, 0x16]);
//!
//! match parse_frame(&bytes[..3]) {
//!     DecodeOutcome::NeedMoreBytes(n) => assert_eq!(n, 2),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```
//!
//! ## Error Handling
//! Checksum mismatches are reported as `Malformed`, never corrected. The codec
//! keeps no state between calls, so a caller that receives `Malformed` discards
//! the buffer and starts over.

use crate::constants::{
    MBUS_ADDRESS_NETWORK_LAYER, MBUS_CONTROL_INFO_RESP_FIXED, MBUS_CONTROL_INFO_RESP_FIXED_MSB,
    MBUS_CONTROL_INFO_RESP_VARIABLE, MBUS_CONTROL_INFO_RESP_VARIABLE_MSB,
    MBUS_CONTROL_INFO_SELECT_SLAVE, MBUS_CONTROL_MASK_FCB, MBUS_CONTROL_MASK_REQ_UD2,
    MBUS_CONTROL_MASK_SND_NKE, MBUS_CONTROL_MASK_SND_UD, MBUS_FRAME_ACK_START,
    MBUS_FRAME_CONTROL_LENGTH, MBUS_FRAME_LONG_OVERHEAD, MBUS_FRAME_LONG_START,
    MBUS_FRAME_MAX_PAYLOAD, MBUS_FRAME_SHORT_SIZE, MBUS_FRAME_SHORT_START, MBUS_FRAME_STOP,
};
use crate::error::{FrameError, MBusError};

/// Represents an M-Bus frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MBusFrame {
    pub frame_type: MBusFrameType,
    pub control: u8,
    pub address: u8,
    pub control_information: u8,
    pub data: Vec<u8>,
    pub checksum: u8,
}

/// Represents the different types of M-Bus frames.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MBusFrameType {
    Ack,
    Short,
    Control,
    Long,
}

/// Result of feeding a byte buffer to [`parse_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A checksum-valid, correctly terminated frame occupies the first `consumed` bytes.
    Complete { frame: MBusFrame, consumed: usize },
    /// The buffer is a valid prefix; at least this many further bytes are required.
    NeedMoreBytes(usize),
    /// The buffer can never become a valid frame.
    Malformed(FrameError),
}

/// States of the frame decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    AwaitingStart,
    AwaitingLength,
    AwaitingHeader,
    AwaitingPayload,
    AwaitingChecksum,
    AwaitingStop,
    Complete,
}

impl MBusFrame {
    /// Builds a frame of the given kind, computing its checksum.
    ///
    /// `Control` frames never carry data; a `Long` frame without data is
    /// indistinguishable from a `Control` frame on the wire.
    pub fn new(
        frame_type: MBusFrameType,
        control: u8,
        address: u8,
        control_information: u8,
        data: &[u8],
    ) -> Result<Self, MBusError> {
        match frame_type {
            MBusFrameType::Ack => return Ok(Self::ack()),
            MBusFrameType::Short => return Ok(Self::short(control, address)),
            MBusFrameType::Control if !data.is_empty() => {
                return Err(MBusError::FrameParseError(
                    "Control frames carry no data".to_string(),
                ))
            }
            _ => {}
        }
        if data.len() > MBUS_FRAME_MAX_PAYLOAD {
            return Err(MBusError::FrameParseError(format!(
                "Payload of {} bytes exceeds {MBUS_FRAME_MAX_PAYLOAD}",
                data.len()
            )));
        }

        let mut frame = MBusFrame {
            frame_type,
            control,
            address,
            control_information,
            data: data.to_vec(),
            checksum: 0,
        };
        frame.checksum = calculate_checksum(&frame);
        Ok(frame)
    }

    /// A long frame carrying `data`; without data it is packed as a control frame.
    pub fn long(
        control: u8,
        address: u8,
        control_information: u8,
        data: &[u8],
    ) -> Result<Self, MBusError> {
        let frame_type = if data.is_empty() {
            MBusFrameType::Control
        } else {
            MBusFrameType::Long
        };
        Self::new(frame_type, control, address, control_information, data)
    }

    /// The single character acknowledgement `E5`.
    pub fn ack() -> Self {
        MBusFrame {
            frame_type: MBusFrameType::Ack,
            control: 0,
            address: 0,
            control_information: 0,
            data: Vec::new(),
            checksum: 0,
        }
    }

    /// A short frame with checksum `C + A`.
    pub fn short(control: u8, address: u8) -> Self {
        MBusFrame {
            frame_type: MBusFrameType::Short,
            control,
            address,
            control_information: 0,
            data: Vec::new(),
            checksum: control.wrapping_add(address),
        }
    }

    /// Returns `true` for the single character acknowledgement.
    pub fn is_ack(&self) -> bool {
        self.frame_type == MBusFrameType::Ack
    }

    /// Returns `true` if the CI field marks a variable data response.
    pub fn is_variable_data_response(&self) -> bool {
        matches!(self.frame_type, MBusFrameType::Long | MBusFrameType::Control)
            && matches!(
                self.control_information,
                MBUS_CONTROL_INFO_RESP_VARIABLE | MBUS_CONTROL_INFO_RESP_VARIABLE_MSB
            )
    }

    /// Returns `true` if the CI field marks a fixed data response.
    pub fn is_fixed_data_response(&self) -> bool {
        matches!(self.frame_type, MBusFrameType::Long | MBusFrameType::Control)
            && matches!(
                self.control_information,
                MBUS_CONTROL_INFO_RESP_FIXED | MBUS_CONTROL_INFO_RESP_FIXED_MSB
            )
    }

    /// Total size of this frame on the wire.
    pub fn wire_len(&self) -> usize {
        match self.frame_type {
            MBusFrameType::Ack => 1,
            MBusFrameType::Short => MBUS_FRAME_SHORT_SIZE,
            MBusFrameType::Control | MBusFrameType::Long => {
                MBUS_FRAME_LONG_OVERHEAD + 3 + self.data.len()
            }
        }
    }
}

/// SND_NKE: resets the link layer of the slave at `address`.
pub fn ping_frame(address: u8) -> MBusFrame {
    MBusFrame::short(MBUS_CONTROL_MASK_SND_NKE, address)
}

/// REQ_UD2: asks the slave at `address` for its class 2 user data.
///
/// `fcb` toggles the frame count bit, which a slave uses to tell a repeated
/// request from a request for the next telegram.
pub fn request_data_frame(address: u8, fcb: bool) -> MBusFrame {
    let control = if fcb {
        MBUS_CONTROL_MASK_REQ_UD2 | MBUS_CONTROL_MASK_FCB
    } else {
        MBUS_CONTROL_MASK_REQ_UD2
    };
    MBusFrame::short(control, address)
}

/// SND_UD to the network layer address selecting the slave(s) matching the
/// packed 8-byte secondary address mask.
pub fn select_secondary_frame(packed_mask: &[u8; 8]) -> MBusFrame {
    let mut frame = MBusFrame {
        frame_type: MBusFrameType::Long,
        control: MBUS_CONTROL_MASK_SND_UD,
        address: MBUS_ADDRESS_NETWORK_LAYER,
        control_information: MBUS_CONTROL_INFO_SELECT_SLAVE,
        data: packed_mask.to_vec(),
        checksum: 0,
    };
    frame.checksum = calculate_checksum(&frame);
    frame
}

/// Packs an M-Bus frame into a byte vector.
///
/// Fails if the data of a control or long frame does not fit the L field,
/// which can only happen for frames built field by field instead of through
/// [`MBusFrame::new`].
pub fn pack_frame(frame: &MBusFrame) -> Result<Vec<u8>, MBusError> {
    let mut data = Vec::with_capacity(frame.wire_len());

    match frame.frame_type {
        MBusFrameType::Ack => {
            data.push(MBUS_FRAME_ACK_START);
        }
        MBusFrameType::Short => {
            data.push(MBUS_FRAME_SHORT_START);
            data.push(frame.control);
            data.push(frame.address);
            data.push(frame.checksum);
            data.push(MBUS_FRAME_STOP);
        }
        MBusFrameType::Control | MBusFrameType::Long => {
            pack_control_or_long_frame(&mut data, frame)?;
        }
    }

    Ok(data)
}

/// Packs a control or long M-Bus frame into a byte vector.
fn pack_control_or_long_frame(data: &mut Vec<u8>, frame: &MBusFrame) -> Result<(), MBusError> {
    if frame.data.len() > MBUS_FRAME_MAX_PAYLOAD {
        return Err(MBusError::FrameParseError(format!(
            "Payload of {} bytes exceeds {MBUS_FRAME_MAX_PAYLOAD}",
            frame.data.len()
        )));
    }
    let length = frame.data.len() as u8 + MBUS_FRAME_CONTROL_LENGTH;
    data.push(MBUS_FRAME_LONG_START);
    data.push(length);
    data.push(length);
    data.push(MBUS_FRAME_LONG_START);
    data.push(frame.control);
    data.push(frame.address);
    data.push(frame.control_information);
    data.extend_from_slice(&frame.data);
    data.push(frame.checksum);
    data.push(MBUS_FRAME_STOP);
    Ok(())
}

/// Verifies the integrity of an M-Bus frame.
pub fn verify_frame(frame: &MBusFrame) -> Result<(), MBusError> {
    let calculated = calculate_checksum(frame);
    if frame.checksum != calculated {
        return Err(FrameError::InvalidChecksum {
            expected: frame.checksum,
            calculated,
        }
        .into());
    }
    Ok(())
}

/// Calculates the checksum of an M-Bus frame.
pub fn calculate_checksum(frame: &MBusFrame) -> u8 {
    match frame.frame_type {
        MBusFrameType::Ack => 0,
        MBusFrameType::Short => frame.control.wrapping_add(frame.address),
        MBusFrameType::Control | MBusFrameType::Long => frame
            .data
            .iter()
            .fold(
                frame
                    .control
                    .wrapping_add(frame.address)
                    .wrapping_add(frame.control_information),
                |acc, b| acc.wrapping_add(*b),
            ),
    }
}

/// Decodes one frame from the start of `input`.
pub fn parse_frame(input: &[u8]) -> DecodeOutcome {
    FrameParser::new(input).run()
}

struct FrameParser<'a> {
    input: &'a [u8],
    state: ParseState,
    pos: usize,
    total: Option<usize>,
    frame: MBusFrame,
}

impl<'a> FrameParser<'a> {
    fn new(input: &'a [u8]) -> Self {
        FrameParser {
            input,
            state: ParseState::AwaitingStart,
            pos: 0,
            total: None,
            frame: MBusFrame::ack(),
        }
    }

    /// Bytes still missing; only called once the total size is known.
    fn need_more(&self) -> DecodeOutcome {
        let total = self.total.unwrap_or(self.pos + 1);
        DecodeOutcome::NeedMoreBytes(total.saturating_sub(self.input.len()).max(1))
    }

    fn run(mut self) -> DecodeOutcome {
        loop {
            match self.state {
                ParseState::AwaitingStart => {
                    let Some(&start) = self.input.first() else {
                        return DecodeOutcome::NeedMoreBytes(1);
                    };
                    self.pos = 1;
                    match start {
                        MBUS_FRAME_ACK_START => {
                            self.total = Some(1);
                            self.state = ParseState::Complete;
                        }
                        MBUS_FRAME_SHORT_START => {
                            self.frame.frame_type = MBusFrameType::Short;
                            self.total = Some(MBUS_FRAME_SHORT_SIZE);
                            self.state = ParseState::AwaitingHeader;
                        }
                        MBUS_FRAME_LONG_START => {
                            self.state = ParseState::AwaitingLength;
                        }
                        other => {
                            return DecodeOutcome::Malformed(FrameError::InvalidStartByte(other))
                        }
                    }
                }
                ParseState::AwaitingLength => {
                    // Both L-fields are needed before the frame size is trusted.
                    if self.input.len() < 3 {
                        return DecodeOutcome::NeedMoreBytes(3 - self.input.len());
                    }
                    let (first, second) = (self.input[1], self.input[2]);
                    if first != second || first < MBUS_FRAME_CONTROL_LENGTH {
                        return DecodeOutcome::Malformed(FrameError::LengthMismatch {
                            first,
                            second,
                        });
                    }
                    self.total = Some(first as usize + MBUS_FRAME_LONG_OVERHEAD);
                    self.frame.frame_type = if first == MBUS_FRAME_CONTROL_LENGTH {
                        MBusFrameType::Control
                    } else {
                        MBusFrameType::Long
                    };

                    let Some(&start2) = self.input.get(3) else {
                        return self.need_more();
                    };
                    if start2 != MBUS_FRAME_LONG_START {
                        return DecodeOutcome::Malformed(FrameError::InvalidSecondStartByte(
                            start2,
                        ));
                    }
                    self.pos = 4;
                    self.state = ParseState::AwaitingHeader;
                }
                ParseState::AwaitingHeader => {
                    let header_len = if self.frame.frame_type == MBusFrameType::Short {
                        2
                    } else {
                        3
                    };
                    let Some(header) = self.input.get(self.pos..self.pos + header_len) else {
                        return self.need_more();
                    };
                    self.frame.control = header[0];
                    self.frame.address = header[1];
                    if header_len == 3 {
                        self.frame.control_information = header[2];
                    }
                    self.pos += header_len;
                    self.state = if self.frame.frame_type == MBusFrameType::Short {
                        ParseState::AwaitingChecksum
                    } else {
                        ParseState::AwaitingPayload
                    };
                }
                ParseState::AwaitingPayload => {
                    let payload_len = self.input[1] as usize - 3;
                    let Some(payload) = self.input.get(self.pos..self.pos + payload_len) else {
                        return self.need_more();
                    };
                    self.frame.data = payload.to_vec();
                    self.pos += payload_len;
                    self.state = ParseState::AwaitingChecksum;
                }
                ParseState::AwaitingChecksum => {
                    let Some(&checksum) = self.input.get(self.pos) else {
                        return self.need_more();
                    };
                    self.frame.checksum = checksum;
                    let calculated = calculate_checksum(&self.frame);
                    if checksum != calculated {
                        return DecodeOutcome::Malformed(FrameError::InvalidChecksum {
                            expected: checksum,
                            calculated,
                        });
                    }
                    self.pos += 1;
                    self.state = ParseState::AwaitingStop;
                }
                ParseState::AwaitingStop => {
                    let Some(&stop) = self.input.get(self.pos) else {
                        return self.need_more();
                    };
                    if stop != MBUS_FRAME_STOP {
                        return DecodeOutcome::Malformed(FrameError::InvalidStopByte(stop));
                    }
                    self.pos += 1;
                    self.state = ParseState::Complete;
                }
                ParseState::Complete => {
                    return DecodeOutcome::Complete {
                        frame: self.frame,
                        consumed: self.pos,
                    };
                }
            }
        }
    }
}
