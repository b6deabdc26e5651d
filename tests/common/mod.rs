//! Simulated multi-drop bus shared by the integration tests.
//!
//! Slaves react to the frames the master sends the way real meters do: a
//! selection with a matching mask is acknowledged, several acknowledgements
//! at once arrive as a collision, and REQ_UD2 to the network layer address is
//! answered by the one selected slave.

#![allow(dead_code)]

use async_trait::async_trait;
use mbus_request::constants::{
    MBUS_ADDRESS_NETWORK_LAYER, MBUS_CONTROL_INFO_RESP_FIXED, MBUS_CONTROL_INFO_RESP_VARIABLE,
    MBUS_CONTROL_INFO_SELECT_SLAVE,
    MBUS_CONTROL_MASK_FCB, MBUS_CONTROL_MASK_REQ_UD2, MBUS_CONTROL_MASK_RSP_UD,
    MBUS_CONTROL_MASK_SND_NKE, MBUS_CONTROL_MASK_SND_UD,
};
use mbus_request::{
    parse_frame, DecodeOutcome, MBusError, MBusFrame, MBusFrameType, Reception, SecondaryAddress,
    Transport,
};
use std::collections::VecDeque;
use std::time::Duration;

/// Variable data payload: 12 byte header for `address` followed by `records`.
pub fn variable_payload(address: &SecondaryAddress, access_number: u8, records: &[u8]) -> Vec<u8> {
    let mut payload = address.pack().to_vec();
    payload.extend_from_slice(&[access_number, 0x00, 0x00, 0x00]);
    payload.extend_from_slice(records);
    payload
}

pub struct SimDevice {
    pub address: SecondaryAddress,
    pub primary: Option<u8>,
    /// Payloads of consecutive telegrams
    pub telegrams: Vec<Vec<u8>>,
    /// CI field of the responses
    pub control_information: u8,
    next: usize,
    last_fcb: Option<bool>,
}

impl SimDevice {
    pub fn new(mask: &str, records: &[u8]) -> Self {
        let address = SecondaryAddress::from_mask(mask).unwrap();
        let payload = variable_payload(&address, 1, records);
        SimDevice {
            address,
            primary: None,
            telegrams: vec![payload],
            control_information: MBUS_CONTROL_INFO_RESP_VARIABLE,
            next: 0,
            last_fcb: None,
        }
    }

    pub fn with_primary(mut self, primary: u8) -> Self {
        self.primary = Some(primary);
        self
    }

    pub fn with_telegrams(mut self, records: &[&[u8]]) -> Self {
        self.telegrams = records
            .iter()
            .enumerate()
            .map(|(i, r)| variable_payload(&self.address, i as u8 + 1, r))
            .collect();
        self
    }

    /// Answers with a single fixed data telegram instead.
    pub fn with_fixed_data(mut self, payload: &[u8]) -> Self {
        self.telegrams = vec![payload.to_vec()];
        self.control_information = MBUS_CONTROL_INFO_RESP_FIXED;
        self
    }

    fn reset(&mut self) {
        self.next = 0;
        self.last_fcb = None;
    }

    /// A toggled FCB moves on to the next telegram, a repeated one resends.
    fn respond(&mut self, fcb: bool) -> MBusFrame {
        if let Some(last) = self.last_fcb {
            if last != fcb && self.next + 1 < self.telegrams.len() {
                self.next += 1;
            }
        }
        self.last_fcb = Some(fcb);
        let address = self.primary.unwrap_or(0);
        MBusFrame::long(
            MBUS_CONTROL_MASK_RSP_UD,
            address,
            self.control_information,
            &self.telegrams[self.next],
        )
        .unwrap()
    }
}

pub struct SimulatedBus {
    pub devices: Vec<SimDevice>,
    selected: Vec<usize>,
    replies: VecDeque<Reception>,
    /// Every frame the master sent, in order
    pub sent: Vec<MBusFrame>,
    /// Fail the n-th `send` call with an I/O error
    pub fail_on_send: Option<usize>,
}

impl SimulatedBus {
    pub fn new(devices: Vec<SimDevice>) -> Self {
        SimulatedBus {
            devices,
            selected: Vec::new(),
            replies: VecDeque::new(),
            sent: Vec::new(),
            fail_on_send: None,
        }
    }

    pub fn selections(&self) -> usize {
        self.sent
            .iter()
            .filter(|f| f.control_information == MBUS_CONTROL_INFO_SELECT_SLAVE)
            .count()
    }

    fn ack_from(&mut self, count: usize) {
        let reply = match count {
            0 => Reception::Timeout,
            1 => Reception::Frame(MBusFrame::ack()),
            _ => Reception::Collision,
        };
        self.replies.push_back(reply);
    }

    fn handle(&mut self, frame: MBusFrame) {
        let control = frame.control & !MBUS_CONTROL_MASK_FCB;
        match (frame.frame_type, control) {
            (MBusFrameType::Short, MBUS_CONTROL_MASK_SND_NKE) => {
                if frame.address == MBUS_ADDRESS_NETWORK_LAYER {
                    self.selected.clear();
                }
                for device in &mut self.devices {
                    device.reset();
                }
                let count = if frame.address == MBUS_ADDRESS_NETWORK_LAYER {
                    self.devices.len().min(1)
                } else {
                    self.devices
                        .iter()
                        .filter(|d| d.primary == Some(frame.address))
                        .count()
                };
                self.ack_from(count);
            }
            (MBusFrameType::Long, MBUS_CONTROL_MASK_SND_UD)
                if frame.control_information == MBUS_CONTROL_INFO_SELECT_SLAVE =>
            {
                let packed: [u8; 8] = frame.data[..8].try_into().unwrap();
                let mask = SecondaryAddress::from_packed(&packed);
                self.selected = self
                    .devices
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| mask.matches(&d.address))
                    .map(|(i, _)| i)
                    .collect();
                for &i in &self.selected {
                    self.devices[i].reset();
                }
                self.ack_from(self.selected.len());
            }
            (MBusFrameType::Short, MBUS_CONTROL_MASK_REQ_UD2) => {
                let fcb = frame.control & MBUS_CONTROL_MASK_FCB != 0;
                let targets: Vec<usize> = if frame.address == MBUS_ADDRESS_NETWORK_LAYER {
                    self.selected.clone()
                } else {
                    (0..self.devices.len())
                        .filter(|&i| self.devices[i].primary == Some(frame.address))
                        .collect()
                };
                let reply = match targets.as_slice() {
                    [] => Reception::Timeout,
                    [i] => Reception::Frame(self.devices[*i].respond(fcb)),
                    _ => Reception::Collision,
                };
                self.replies.push_back(reply);
            }
            _ => self.replies.push_back(Reception::Timeout),
        }
    }
}

#[async_trait]
impl Transport for SimulatedBus {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), MBusError> {
        if self.fail_on_send == Some(self.sent.len()) {
            return Err(MBusError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "bus unplugged",
            )));
        }
        match parse_frame(bytes) {
            DecodeOutcome::Complete { frame, .. } => {
                self.sent.push(frame.clone());
                self.handle(frame);
                Ok(())
            }
            other => panic!("master sent an invalid frame: {other:?}"),
        }
    }

    async fn receive(&mut self, _timeout: Duration) -> Result<Reception, MBusError> {
        Ok(self.replies.pop_front().unwrap_or(Reception::Timeout))
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(300)
    }
}
