//! # M-Bus Data Records
//!
//! A data record is a data information block (DIF + DIFEs), a value
//! information block (VIF + VIFEs) and the value bytes whose length the DIF
//! announces. `parse_record` consumes one record from a payload slice.

use crate::constants::*;
use crate::error::MBusError;
use crate::payload::data_encoding::{
    decode_bcd, decode_bin, decode_int, decode_mbus_time, decode_real, decode_string,
    MBusDateTime,
};
use crate::payload::vif::{normalize_vib, parse_vib, ValueInformationBlock};
use crate::payload::vif_maps::is_time_point;
use bitflags::bitflags;
use nom::{bytes::complete::take, number::complete::u8 as byte};
use serde::Serialize;

bitflags! {
    /// Diagnostic markers attached to a decoded record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    pub struct RecordFlags: u16 {
        /// The VIF or its extension code is not in any table; unit is empty.
        const UNKNOWN_UNIT = 0x0001;
        /// A combinable VIFE was not recognised.
        const UNKNOWN_VIFE = 0x0002;
        /// Manufacturer specific VIF or VIFE.
        const MANUFACTURER_SPECIFIC = 0x0004;
        /// A VIFE carries a record error code.
        const RECORD_ERROR = 0x0008;
        /// The value was captured during an error state.
        const VALUE_DURING_ERROR = 0x0010;
        /// The value bytes could not be decoded (bad BCD digit, reserved length).
        const INVALID_VALUE = 0x0020;
        /// A date/time value is flagged invalid or is not a calendar date.
        const INVALID_DATE = 0x0040;
    }
}

/// Function field of the DIF (bits 4-5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordFunction {
    Instantaneous,
    Maximum,
    Minimum,
    ErrorState,
}

impl RecordFunction {
    pub fn from_dif(dif: u8) -> Self {
        match (dif & MBUS_DATA_RECORD_DIF_MASK_FUNCTION) >> 4 {
            0 => RecordFunction::Instantaneous,
            1 => RecordFunction::Maximum,
            2 => RecordFunction::Minimum,
            _ => RecordFunction::ErrorState,
        }
    }
}

/// Decoded record value. Numeric values are already scaled by the exponent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MBusRecordValue {
    Integer(i64),
    Real(f64),
    Bcd(i64),
    String(String),
    DateTime(MBusDateTime),
    None,
}

impl MBusRecordValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MBusRecordValue::Integer(v) | MBusRecordValue::Bcd(v) => Some(*v as f64),
            MBusRecordValue::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// Applies `value × 10^exponent`. Integers stay integers when the
    /// exponent is non-negative and the product fits.
    pub fn scaled(self, exponent: i32) -> Self {
        if exponent == 0 {
            return self;
        }
        let multiply = |v: i64| {
            10i64
                .checked_pow(exponent as u32)
                .and_then(|factor| v.checked_mul(factor))
        };
        match self {
            MBusRecordValue::Integer(v) if exponent > 0 => multiply(v)
                .map(MBusRecordValue::Integer)
                .unwrap_or(MBusRecordValue::Real(v as f64 * 10f64.powi(exponent))),
            MBusRecordValue::Bcd(v) if exponent > 0 => multiply(v)
                .map(MBusRecordValue::Bcd)
                .unwrap_or(MBusRecordValue::Real(v as f64 * 10f64.powi(exponent))),
            MBusRecordValue::Integer(v) | MBusRecordValue::Bcd(v) => {
                MBusRecordValue::Real(v as f64 / 10f64.powi(-exponent))
            }
            MBusRecordValue::Real(v) if exponent > 0 => {
                MBusRecordValue::Real(v * 10f64.powi(exponent))
            }
            MBusRecordValue::Real(v) => MBusRecordValue::Real(v / 10f64.powi(-exponent)),
            other => other,
        }
    }
}

impl std::fmt::Display for MBusRecordValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MBusRecordValue::Integer(v) | MBusRecordValue::Bcd(v) => write!(f, "{v}"),
            MBusRecordValue::Real(v) => write!(f, "{v}"),
            MBusRecordValue::String(s) => write!(f, "{s}"),
            MBusRecordValue::DateTime(dt) => write!(f, "{dt}"),
            MBusRecordValue::None => Ok(()),
        }
    }
}

/// Data field coding from the low nibble of the DIF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataField {
    NoData,
    Integer(usize),
    Real32,
    SelectionForReadout,
    Bcd(usize),
    Variable,
    Special,
}

impl DataField {
    pub fn from_dif(dif: u8) -> Self {
        match dif & MBUS_DATA_RECORD_DIF_MASK_DATA {
            0x00 => DataField::NoData,
            0x01 => DataField::Integer(1),
            0x02 => DataField::Integer(2),
            0x03 => DataField::Integer(3),
            0x04 => DataField::Integer(4),
            0x05 => DataField::Real32,
            0x06 => DataField::Integer(6),
            0x07 => DataField::Integer(8),
            0x08 => DataField::SelectionForReadout,
            0x09 => DataField::Bcd(1),
            0x0A => DataField::Bcd(2),
            0x0B => DataField::Bcd(3),
            0x0C => DataField::Bcd(4),
            0x0D => DataField::Variable,
            0x0E => DataField::Bcd(6),
            _ => DataField::Special,
        }
    }
}

/// Raw data information block as transmitted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataInformationBlock {
    pub dif: u8,
    pub dife: Vec<u8>,
}

impl DataInformationBlock {
    pub fn storage_number(&self) -> u64 {
        let mut storage = ((self.dif & MBUS_DATA_RECORD_DIF_MASK_STORAGE_NO) >> 6) as u64;
        for (i, dife) in self.dife.iter().enumerate() {
            storage |= ((dife & MBUS_DATA_RECORD_DIFE_MASK_STORAGE_NO) as u64) << (4 * i + 1);
        }
        storage
    }

    pub fn tariff(&self) -> u32 {
        self.dife.iter().enumerate().fold(0, |acc, (i, dife)| {
            acc | ((((dife & MBUS_DATA_RECORD_DIFE_MASK_TARIFF) >> 4) as u32) << (2 * i))
        })
    }

    pub fn subunit(&self) -> u32 {
        self.dife.iter().enumerate().fold(0, |acc, (i, dife)| {
            acc | ((((dife & MBUS_DATA_RECORD_DIFE_MASK_DEVICE) >> 6) as u32) << i)
        })
    }
}

/// One decoded data record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MBusRecord {
    #[serde(skip)]
    pub dib: DataInformationBlock,
    #[serde(skip)]
    pub vib: ValueInformationBlock,
    pub function: RecordFunction,
    pub storage_number: u64,
    pub tariff: u32,
    pub subunit: u32,
    pub value: MBusRecordValue,
    pub unit: String,
    pub exponent: i32,
    pub quantity: String,
    pub flags: RecordFlags,
    /// Value bytes exactly as transmitted
    #[serde(serialize_with = "crate::util::hex::serialize_hex")]
    pub raw: Vec<u8>,
}

impl MBusRecord {
    /// A record with no DIB/VIB, used for fixed structure counters.
    pub fn bare(quantity: &str, value: MBusRecordValue, raw: Vec<u8>) -> Self {
        MBusRecord {
            dib: DataInformationBlock::default(),
            vib: ValueInformationBlock::default(),
            function: RecordFunction::Instantaneous,
            storage_number: 0,
            tariff: 0,
            subunit: 0,
            value,
            unit: String::new(),
            exponent: 0,
            quantity: quantity.to_string(),
            flags: RecordFlags::empty(),
            raw,
        }
    }
}

/// Result of reading one DIF position of the payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordItem {
    Record(MBusRecord),
    /// 0x2F filler byte
    Idle,
    /// 0x0F / 0x1F: the rest of the payload is manufacturer specific.
    ManufacturerData {
        more_records_follow: bool,
        data: Vec<u8>,
    },
}

fn next_byte(input: &[u8]) -> Result<(&[u8], u8), MBusError> {
    byte::<_, nom::error::Error<&[u8]>>(input).map_err(|_| MBusError::PrematureEndAtData)
}

fn take_bytes(input: &[u8], count: usize) -> Result<(&[u8], &[u8]), MBusError> {
    take::<_, _, nom::error::Error<&[u8]>>(count)(input).map_err(|_| MBusError::PrematureEndAtData)
}

/// Reads a DIF and its DIFE chain.
pub fn parse_dib(input: &[u8]) -> Result<(&[u8], DataInformationBlock), MBusError> {
    let (mut input, dif) = next_byte(input)?;
    let mut dib = DataInformationBlock {
        dif,
        dife: Vec::new(),
    };

    let mut extended = dif & MBUS_DIB_DIF_EXTENSION_BIT != 0;
    while extended {
        if dib.dife.len() == MBUS_DIB_DIFE_MAX {
            return Err(MBusError::DifChainTooLong);
        }
        let (rest, dife) = next_byte(input)?;
        dib.dife.push(dife);
        extended = dife & MBUS_DIB_DIF_EXTENSION_BIT != 0;
        input = rest;
    }

    Ok((input, dib))
}

/// Reads the value bytes announced by the DIF.
fn parse_value_bytes(input: &[u8], field: DataField) -> Result<(&[u8], Vec<u8>), MBusError> {
    let size = match field {
        DataField::NoData | DataField::SelectionForReadout | DataField::Special => 0,
        DataField::Integer(n) | DataField::Bcd(n) => n,
        DataField::Real32 => 4,
        DataField::Variable => {
            let (rest, lvar) = next_byte(input)?;
            let size = match lvar {
                0x00..=0xBF => lvar as usize,
                0xC0..=0xCF => (lvar - 0xC0) as usize,
                0xD0..=0xDF => (lvar - 0xD0) as usize,
                0xE0..=0xEF => (lvar - 0xE0) as usize,
                0xF0..=0xFA => 4 * (lvar - 0xEC) as usize,
                _ => {
                    return Err(MBusError::FrameParseError(format!(
                        "reserved LVAR 0x{lvar:02X}"
                    )))
                }
            };
            let (rest, bytes) = take_bytes(rest, size)?;
            let mut raw = Vec::with_capacity(size + 1);
            raw.push(lvar);
            raw.extend_from_slice(bytes);
            return Ok((rest, raw));
        }
    };
    let (rest, bytes) = take_bytes(input, size)?;
    Ok((rest, bytes.to_vec()))
}

/// Decodes value bytes according to the DIF coding. Not yet scaled.
fn decode_value(
    field: DataField,
    raw: &[u8],
    time_point: bool,
) -> Result<MBusRecordValue, MBusError> {
    Ok(match field {
        DataField::NoData | DataField::SelectionForReadout | DataField::Special => {
            MBusRecordValue::None
        }
        DataField::Integer(n) if time_point && matches!(n, 2 | 4 | 6) => {
            MBusRecordValue::DateTime(decode_mbus_time(raw)?)
        }
        DataField::Integer(_) => MBusRecordValue::Integer(decode_int(raw)?),
        DataField::Real32 => MBusRecordValue::Real(decode_real(raw)? as f64),
        DataField::Bcd(_) => MBusRecordValue::Bcd(decode_bcd(raw)?),
        DataField::Variable => {
            let (lvar, bytes) = raw
                .split_first()
                .ok_or(MBusError::PrematureEndAtData)?;
            match lvar {
                0x00..=0xBF => MBusRecordValue::String(decode_string(bytes)),
                0xC0..=0xCF => MBusRecordValue::Bcd(decode_bcd(bytes)?),
                0xD0..=0xDF => MBusRecordValue::Bcd(-decode_bcd(bytes)?),
                0xE0..=0xEF if bytes.len() <= 8 && !bytes.is_empty() => {
                    MBusRecordValue::Integer(decode_int(bytes)?)
                }
                _ => MBusRecordValue::String(decode_bin(bytes)),
            }
        }
    })
}

/// Reads one record, filler byte or manufacturer specific tail.
pub fn parse_record(input: &[u8]) -> Result<(&[u8], RecordItem), MBusError> {
    let (rest, dib) = parse_dib(input)?;

    match dib.dif {
        MBUS_DIB_DIF_IDLE_FILLER => return Ok((rest, RecordItem::Idle)),
        MBUS_DIB_DIF_MANUFACTURER_SPECIFIC | MBUS_DIB_DIF_MORE_RECORDS_FOLLOW => {
            return Ok((
                &[],
                RecordItem::ManufacturerData {
                    more_records_follow: dib.dif == MBUS_DIB_DIF_MORE_RECORDS_FOLLOW,
                    data: rest.to_vec(),
                },
            ));
        }
        // global readout request, no VIB follows
        0x7F => {
            let mut record =
                MBusRecord::bare("Global readout request", MBusRecordValue::None, Vec::new());
            record.dib = dib;
            return Ok((rest, RecordItem::Record(record)));
        }
        dif if dif & MBUS_DATA_RECORD_DIF_MASK_DATA == 0x0F => {
            return Err(MBusError::UnknownDif(dif));
        }
        _ => {}
    }

    let (rest, vib) = parse_vib(rest)?;
    let field = DataField::from_dif(dib.dif);
    let (rest, raw) = parse_value_bytes(rest, field)?;

    let info = normalize_vib(&vib);
    let mut flags = info.flags;
    let time_point = is_time_point(info.code);

    let value = match decode_value(field, &raw, time_point) {
        Ok(MBusRecordValue::DateTime(dt)) => {
            if !dt.is_valid() {
                flags |= RecordFlags::INVALID_DATE;
            }
            MBusRecordValue::DateTime(dt)
        }
        Ok(value) if flags.contains(RecordFlags::UNKNOWN_UNIT) => value,
        Ok(value) => value.scaled(info.exponent),
        Err(err) => {
            log::warn!("Undecodable value in record DIF 0x{:02X}: {err}", dib.dif);
            flags |= RecordFlags::INVALID_VALUE;
            MBusRecordValue::None
        }
    };

    let exponent = if flags.contains(RecordFlags::UNKNOWN_UNIT) {
        0
    } else {
        info.exponent
    };

    let record = MBusRecord {
        function: RecordFunction::from_dif(dib.dif),
        storage_number: dib.storage_number(),
        tariff: dib.tariff(),
        subunit: dib.subunit(),
        value,
        unit: info.unit,
        exponent,
        quantity: info.quantity,
        flags,
        raw,
        dib,
        vib,
    };

    Ok((rest, RecordItem::Record(record)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(input: &[u8]) -> MBusRecord {
        match parse_record(input).unwrap().1 {
            RecordItem::Record(record) => record,
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn test_dib_storage_tariff_subunit() {
        // DIF storage bit set, DIFE: storage 0x3, tariff 2, subunit 1
        let (rest, dib) = parse_dib(&[0xC4, 0x63, 0x13]).unwrap();
        assert_eq!(rest, &[0x13]);
        assert_eq!(dib.storage_number(), 1 | (3 << 1));
        assert_eq!(dib.tariff(), 2);
        assert_eq!(dib.subunit(), 1);
    }

    #[test]
    fn test_dib_chain_too_long() {
        let mut input = vec![0x84];
        input.extend(std::iter::repeat(0x80).take(MBUS_DIB_DIFE_MAX));
        assert!(matches!(parse_dib(&input), Err(MBusError::DifChainTooLong)));
    }

    #[test]
    fn test_record_bcd_scaled() {
        // 4 digit BCD, volume 10^-2 m^3 (VIF 0x14)
        let rec = record(&[0x0A, 0x14, 0x34, 0x12]);
        assert!(matches!(rec.value, MBusRecordValue::Real(v) if (v - 12.34).abs() < 1e-9));
        assert_eq!(rec.unit, "m^3");
        assert_eq!(rec.exponent, -2);
        assert_eq!(rec.raw, vec![0x34, 0x12]);
    }

    #[test]
    fn test_record_integer_positive_exponent() {
        // Energy 10^3 Wh
        let rec = record(&[0x02, 0x06, 0x10, 0x00]);
        assert_eq!(rec.value, MBusRecordValue::Integer(16_000));
    }

    #[test]
    fn test_record_function_field() {
        assert_eq!(record(&[0x22, 0x13, 0x01, 0x00]).function, RecordFunction::Minimum);
        assert_eq!(record(&[0x31, 0x13, 0x01]).function, RecordFunction::ErrorState);
    }

    #[test]
    fn test_record_date() {
        let rec = record(&[0x02, 0x6C, 0xEF, 0x26]);
        match rec.value {
            MBusRecordValue::DateTime(dt) => assert_eq!(dt.to_string(), "2023-06-15"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(rec.flags.is_empty());
    }

    #[test]
    fn test_record_invalid_date_flagged() {
        let rec = record(&[0x04, 0x6D, 0x9E, 0x0C, 0xEF, 0x26]);
        assert!(rec.flags.contains(RecordFlags::INVALID_DATE));
    }

    #[test]
    fn test_record_invalid_bcd_flagged() {
        let (rest, item) = parse_record(&[0x0A, 0x13, 0xAB, 0x12, 0x01]).unwrap();
        assert_eq!(rest, &[0x01]);
        let RecordItem::Record(rec) = item else { panic!() };
        assert_eq!(rec.value, MBusRecordValue::None);
        assert!(rec.flags.contains(RecordFlags::INVALID_VALUE));
        assert_eq!(rec.raw, vec![0xAB, 0x12]);
    }

    #[test]
    fn test_record_variable_string() {
        let rec = record(&[0x0D, 0xFD, 0x0C, 0x03, b'C', b'B', b'A']);
        assert_eq!(rec.value, MBusRecordValue::String("ABC".to_string()));
        assert_eq!(rec.quantity, "Model / Version");
    }

    #[test]
    fn test_record_variable_bcd() {
        // VIF 0x16: m^3, exponent 0
        let rec = record(&[0x0D, 0x16, 0xC2, 0x34, 0x12]);
        assert_eq!(rec.value, MBusRecordValue::Bcd(1234));
        assert_eq!(rec.raw, vec![0xC2, 0x34, 0x12]);

        let rec = record(&[0x0D, 0x16, 0xD2, 0x34, 0x12]);
        assert_eq!(rec.value, MBusRecordValue::Bcd(-1234));
    }

    #[test]
    fn test_record_variable_bcd_overflow_flagged() {
        // 20 BCD digits do not fit an i64
        let mut input = vec![0x0D, 0x13, 0xCA];
        input.extend([0x99; 10]);
        input.extend([0x01, 0xFD, 0x17, 0x04]);

        let (rest, item) = parse_record(&input).unwrap();
        assert_eq!(rest, &[0x01, 0xFD, 0x17, 0x04]);
        let RecordItem::Record(rec) = item else { panic!() };
        assert_eq!(rec.value, MBusRecordValue::None);
        assert!(rec.flags.contains(RecordFlags::INVALID_VALUE));
        assert_eq!(rec.raw.len(), 11);

        assert_eq!(record(rest).value, MBusRecordValue::Integer(4));
    }

    #[test]
    fn test_record_variable_binary() {
        let rec = record(&[0x0D, 0x16, 0xE2, 0x34, 0x12]);
        assert_eq!(rec.value, MBusRecordValue::Integer(0x1234));

        // 0xF0: 4 * (0xF0 - 0xEC) = 16 bytes
        let mut input = vec![0x0D, 0x16, 0xF0];
        input.extend(0u8..16);
        let rec = record(&input);
        assert_eq!(rec.raw.len(), 17);
        assert_eq!(
            rec.value,
            MBusRecordValue::String(
                "00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F".to_string()
            )
        );
    }

    #[test]
    fn test_record_real32() {
        let mut input = vec![0x05, 0x16];
        input.extend(1.5f32.to_le_bytes());
        assert_eq!(record(&input).value, MBusRecordValue::Real(1.5));

        // 10^-1 m^3
        let mut input = vec![0x05, 0x15];
        input.extend(2.5f32.to_le_bytes());
        let rec = record(&input);
        assert!(matches!(rec.value, MBusRecordValue::Real(v) if (v - 0.25).abs() < 1e-9));
        assert_eq!(rec.exponent, -1);
    }

    #[test]
    fn test_record_additive_correction_keeps_value() {
        // 5 * 10^-3 m^3, marked as correction constant
        let rec = record(&[0x01, 0x93, 0x7B, 0x05]);
        assert!(matches!(rec.value, MBusRecordValue::Real(v) if (v - 0.005).abs() < 1e-12));
        assert_eq!(rec.exponent, -3);
        assert!(rec.quantity.contains("additive correction constant"));
    }

    #[test]
    fn test_record_unknown_vif_keeps_raw() {
        let rec = record(&[0x01, 0xFD, 0x3C, 0x05]);
        assert_eq!(rec.unit, "");
        assert!(rec.flags.contains(RecordFlags::UNKNOWN_UNIT));
        assert_eq!(rec.raw, vec![0x05]);
        assert_eq!(rec.value, MBusRecordValue::Integer(5));
    }

    #[test]
    fn test_idle_filler_and_manufacturer_tail() {
        assert_eq!(parse_record(&[0x2F, 0x01]).unwrap(), (&[0x01][..], RecordItem::Idle));
        let (rest, item) = parse_record(&[0x1F, 0xAA, 0xBB]).unwrap();
        assert!(rest.is_empty());
        assert_eq!(
            item,
            RecordItem::ManufacturerData {
                more_records_follow: true,
                data: vec![0xAA, 0xBB]
            }
        );
    }

    #[test]
    fn test_truncated_value() {
        assert!(matches!(
            parse_record(&[0x04, 0x13, 0x01]),
            Err(MBusError::PrematureEndAtData)
        ));
    }

    #[test]
    fn test_scaled_overflow_falls_back_to_real() {
        let v = MBusRecordValue::Integer(i64::MAX).scaled(2);
        assert!(matches!(v, MBusRecordValue::Real(_)));
    }
}
