//! # Application Data Decoding
//!
//! Turns the payload of an RSP_UD frame into a [`FrameData`]: the data header
//! followed by every data record in transmission order.
//!
//! Variable data responses (CI 0x72/0x76) carry a 12 byte header and a list of
//! self-describing records. Fixed data responses (CI 0x73/0x77) carry an
//! identification number and two counters. A general application error
//! (CI 0x70) is reported as [`MBusError::ApplicationError`].
//!
//! Telegrams announcing "more records follow" can be merged with [`extend`].

use crate::constants::*;
use crate::error::MBusError;
use crate::mbus::frame::MBusFrame;
use crate::mbus::secondary_addressing::SecondaryAddress;
use crate::payload::data_encoding::{decode_bcd, decode_uint, mbus_decode_manufacturer};
use crate::payload::record::{
    parse_record, MBusRecord, MBusRecordValue, RecordFunction, RecordItem,
};
use nom::{
    bytes::complete::take,
    number::complete::{le_u16, u8 as byte},
    sequence::tuple,
    IResult,
};
use serde::Serialize;
use std::fmt;

/// Header of a variable data response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableDataHeader {
    /// Identification number, 8 BCD digits
    pub identification: String,
    pub manufacturer: String,
    pub manufacturer_id: u16,
    pub version: u8,
    pub medium: u8,
    pub access_number: u8,
    pub status: u8,
    pub signature: u16,
    #[serde(skip)]
    packed: [u8; 8],
}

impl VariableDataHeader {
    /// The secondary address this header identifies.
    pub fn secondary_address(&self) -> SecondaryAddress {
        SecondaryAddress::from_packed(&self.packed)
    }

    pub fn medium_name(&self) -> &'static str {
        medium_name(self.medium)
    }
}

/// Header of a fixed data response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixedDataHeader {
    pub identification: String,
    pub access_number: u8,
    pub status: u8,
    pub medium: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum DataHeader {
    Variable(VariableDataHeader),
    Fixed(FixedDataHeader),
}

/// Decoded application data of one or more telegrams.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameData {
    pub header: DataHeader,
    pub records: Vec<MBusRecord>,
    /// The slave has further telegrams for this readout (DIF 0x1F).
    pub more_records_follow: bool,
    /// Bytes following a manufacturer specific DIF, kept undecoded
    #[serde(serialize_with = "crate::util::hex::serialize_hex")]
    pub manufacturer_data: Vec<u8>,
}

impl FrameData {
    pub fn variable_header(&self) -> Option<&VariableDataHeader> {
        match &self.header {
            DataHeader::Variable(header) => Some(header),
            DataHeader::Fixed(_) => None,
        }
    }

    /// Pretty printed JSON document.
    pub fn to_json(&self) -> Result<String, MBusError> {
        serde_json::to_string_pretty(self).map_err(|e| MBusError::Other(e.to_string()))
    }

    /// Drops every record without a numeric value (strings, dates, empty values).
    pub fn retain_numeric(&mut self) {
        self.records.retain(|record| record.value.as_f64().is_some());
    }

    /// Records reduced to quantity, unit and a plain number, in order.
    pub fn normalized(&self) -> Vec<NormalizedRecord> {
        self.records
            .iter()
            .enumerate()
            .map(|(id, record)| NormalizedRecord {
                id,
                function: record.function,
                storage_number: record.storage_number,
                tariff: record.tariff,
                subunit: record.subunit,
                quantity: record.quantity.clone(),
                unit: record.unit.clone(),
                value: match record.value.as_f64() {
                    Some(number) => MBusRecordValue::Real(number),
                    None => record.value.clone(),
                },
            })
            .collect()
    }

    /// Pretty printed JSON document of the normalized records.
    pub fn to_normalized_json(&self) -> Result<String, MBusError> {
        let document = serde_json::json!({
            "header": &self.header,
            "records": self.normalized(),
        });
        serde_json::to_string_pretty(&document).map_err(|e| MBusError::Other(e.to_string()))
    }
}

/// A record as a plain number in the unit of its table entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub id: usize,
    pub function: RecordFunction,
    pub storage_number: u64,
    pub tariff: u32,
    pub subunit: u32,
    pub quantity: String,
    pub unit: String,
    pub value: MBusRecordValue,
}

impl fmt::Display for NormalizedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} = {}", self.id, self.quantity, self.value)?;
        if !self.unit.is_empty() {
            write!(f, " {}", self.unit)?;
        }
        Ok(())
    }
}

impl fmt::Display for FrameData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.header {
            DataHeader::Variable(h) => {
                writeln!(f, "Identification: {}", h.identification)?;
                writeln!(f, "Manufacturer:   {}", h.manufacturer)?;
                writeln!(f, "Version:        0x{:02X}", h.version)?;
                writeln!(f, "Medium:         {} (0x{:02X})", h.medium_name(), h.medium)?;
                writeln!(f, "Access number:  {}", h.access_number)?;
                writeln!(f, "Status:         0x{:02X}", h.status)?;
            }
            DataHeader::Fixed(h) => {
                writeln!(f, "Identification: {}", h.identification)?;
                writeln!(f, "Medium:         {}", h.medium)?;
                writeln!(f, "Access number:  {}", h.access_number)?;
                writeln!(f, "Status:         0x{:02X}", h.status)?;
            }
        }
        for (idx, record) in self.records.iter().enumerate() {
            write!(f, "[{idx}] {}: {}", record.quantity, record.value)?;
            if !record.unit.is_empty() {
                write!(f, " {}", record.unit)?;
            }
            if record.storage_number != 0 || record.tariff != 0 || record.subunit != 0 {
                write!(
                    f,
                    " (storage {}, tariff {}, subunit {})",
                    record.storage_number, record.tariff, record.subunit
                )?;
            }
            if !record.flags.is_empty() {
                write!(f, " {:?}", record.flags)?;
            }
            writeln!(f)?;
        }
        if self.more_records_follow {
            writeln!(f, "More records follow")?;
        }
        Ok(())
    }
}

/// Medium names of the variable data header.
pub fn medium_name(medium: u8) -> &'static str {
    match medium {
        0x00 => "Other",
        0x01 => "Oil",
        0x02 => "Electricity",
        0x03 => "Gas",
        0x04 => "Heat: Outlet",
        0x05 => "Steam",
        0x06 => "Hot water",
        0x07 => "Water",
        0x08 => "Heat Cost Allocator",
        0x09 => "Compressed Air",
        0x0A => "Cooling load meter: Outlet",
        0x0B => "Cooling load meter: Inlet",
        0x0C => "Heat: Inlet",
        0x0D => "Heat / Cooling load meter",
        0x0E => "Bus / System",
        0x0F => "Unknown Medium",
        0x14 => "Calorific value",
        0x15 => "Hot water",
        0x16 => "Cold water",
        0x17 => "Dual water",
        0x18 => "Pressure",
        0x19 => "A/D Converter",
        _ => "Reserved",
    }
}

fn identification(id: &[u8]) -> String {
    id.iter().rev().map(|b| format!("{b:02X}")).collect()
}

fn parse_variable_header(input: &[u8]) -> IResult<&[u8], VariableDataHeader> {
    let (rest, (id, manufacturer_id, version, medium, access_number, status, signature)) =
        tuple((take(4usize), le_u16, byte, byte, byte, byte, le_u16))(input)?;

    let mut packed = [0u8; 8];
    packed.copy_from_slice(&input[..8]);

    Ok((
        rest,
        VariableDataHeader {
            identification: identification(id),
            manufacturer: mbus_decode_manufacturer(manufacturer_id),
            manufacturer_id,
            version,
            medium,
            access_number,
            status,
            signature,
            packed,
        },
    ))
}

/// Decodes the records that follow a variable data header.
///
/// Returns the records, the "more records follow" marker and any trailing
/// manufacturer specific bytes.
pub fn decode_records(mut input: &[u8]) -> Result<(Vec<MBusRecord>, bool, Vec<u8>), MBusError> {
    let mut records = Vec::new();
    while !input.is_empty() {
        let (rest, item) = parse_record(input)?;
        input = rest;
        match item {
            RecordItem::Record(record) => records.push(record),
            RecordItem::Idle => {}
            RecordItem::ManufacturerData {
                more_records_follow,
                data,
            } => return Ok((records, more_records_follow, data)),
        }
    }
    Ok((records, false, Vec::new()))
}

/// Decodes the payload of a variable data response.
pub fn decode(payload: &[u8]) -> Result<FrameData, MBusError> {
    if payload.len() < MBUS_DATA_VARIABLE_HEADER_LENGTH {
        return Err(MBusError::PrematureEndAtData);
    }
    let (rest, header) = parse_variable_header(payload)?;
    let (records, more_records_follow, manufacturer_data) = decode_records(rest)?;

    log::debug!(
        "Decoded {} records from {} ({}), more follow: {}",
        records.len(),
        header.identification,
        header.manufacturer,
        more_records_follow
    );

    Ok(FrameData {
        header: DataHeader::Variable(header),
        records,
        more_records_follow,
        manufacturer_data,
    })
}

/// Appends the records of a follow-up telegram to `existing`.
///
/// The header of the first telegram is kept; the continuation marker is
/// taken from the new telegram.
pub fn extend(mut existing: FrameData, payload: &[u8]) -> Result<FrameData, MBusError> {
    let next = decode(payload)?;
    existing.records.extend(next.records);
    existing.manufacturer_data.extend(next.manufacturer_data);
    existing.more_records_follow = next.more_records_follow;
    Ok(existing)
}

const FIXED_MEDIUM: [&str; 16] = [
    "Other",
    "Oil",
    "Electricity",
    "Gas",
    "Heat",
    "Steam",
    "Hot Water",
    "Water",
    "H.C.A.",
    "Reserved",
    "Gas Mode 2",
    "Heat Mode 2",
    "Hot Water Mode 2",
    "Water Mode 2",
    "H.C.A. Mode 2",
    "Reserved",
];

// Groups of three consecutive codes starting at 0x02, exponent rising by one.
const FIXED_UNIT_GROUPS: [(&str, i32); 18] = [
    ("Wh", 0),
    ("Wh", 3),
    ("Wh", 6),
    ("J", 3),
    ("J", 6),
    ("J", 9),
    ("W", 0),
    ("W", 3),
    ("W", 6),
    ("J/h", 3),
    ("J/h", 6),
    ("J/h", 9),
    ("m^3", -6),
    ("m^3", -3),
    ("m^3", 0),
    ("m^3/h", -6),
    ("m^3/h", -3),
    ("m^3/h", 0),
];

fn fixed_unit(unit_code: u8) -> (&'static str, i32) {
    match unit_code & 0x3F {
        0x00 => ("h,m,s", 0),
        0x01 => ("D,M,Y", 0),
        code @ 0x02..=0x37 => {
            let (unit, base) = FIXED_UNIT_GROUPS[((code - 0x02) / 3) as usize];
            (unit, base + ((code - 0x02) % 3) as i32)
        }
        0x38 => ("°C", -3),
        0x39 => ("Units for H.C.A.", 0),
        _ => ("", 0),
    }
}

type FixedFields<'a> = (&'a [u8], u8, u8, u8, u8, &'a [u8], &'a [u8]);

fn parse_fixed_fields(input: &[u8]) -> IResult<&[u8], FixedFields<'_>> {
    tuple((take(4usize), byte, byte, byte, byte, take(4usize), take(4usize)))(input)
}

/// Decodes the payload of a fixed data response.
pub fn decode_fixed(payload: &[u8]) -> Result<FrameData, MBusError> {
    if payload.len() < MBUS_DATA_FIXED_LENGTH {
        return Err(MBusError::PrematureEndAtData);
    }
    let (_, (id, access_number, status, unit1, unit2, counter1, counter2)) =
        parse_fixed_fields(payload)?;

    let medium = ((unit1 & 0xC0) >> 6) | ((unit2 & 0xC0) >> 4);
    let integer_counters =
        status & MBUS_DATA_FIXED_STATUS_FORMAT_MASK == MBUS_DATA_FIXED_STATUS_FORMAT_INT;

    let mut records = Vec::with_capacity(2);
    for (quantity, unit_code, raw) in [
        ("Counter 1", unit1, counter1),
        ("Counter 2", unit2, counter2),
    ] {
        let value = if integer_counters {
            MBusRecordValue::Integer(decode_uint(raw)? as i64)
        } else {
            MBusRecordValue::Bcd(decode_bcd(raw)?)
        };
        let (unit, exponent) = fixed_unit(unit_code);
        let mut record = MBusRecord::bare(quantity, value.scaled(exponent), raw.to_vec());
        record.unit = unit.to_string();
        record.exponent = exponent;
        records.push(record);
    }

    Ok(FrameData {
        header: DataHeader::Fixed(FixedDataHeader {
            identification: identification(id),
            access_number,
            status,
            medium: FIXED_MEDIUM[medium as usize],
        }),
        records,
        more_records_follow: false,
        manufacturer_data: Vec::new(),
    })
}

fn application_error(code: u8) -> &'static str {
    match code {
        0x00 => "Unspecified error",
        0x01 => "Unimplemented CI-Field",
        0x02 => "Buffer too long, truncated",
        0x03 => "Too many records",
        0x04 => "Premature end of record",
        0x05 => "More than 10 DIFE's",
        0x06 => "More than 10 VIFE's",
        0x08 => "Application too busy for handling readout request",
        0x09 => "Too many readouts",
        _ => "Reserved",
    }
}

/// Decodes the application data of a response frame according to its CI field.
pub fn decode_frame(frame: &MBusFrame) -> Result<FrameData, MBusError> {
    if frame.is_variable_data_response() {
        decode(&frame.data)
    } else if frame.is_fixed_data_response() {
        decode_fixed(&frame.data)
    } else if frame.control_information == MBUS_CONTROL_INFO_ERROR_GENERAL {
        let code = frame.data.first().copied().unwrap_or(0);
        Err(MBusError::ApplicationError {
            code,
            description: application_error(code).to_string(),
        })
    } else {
        Err(MBusError::UnsupportedControlInformation(
            frame.control_information,
        ))
    }
}
