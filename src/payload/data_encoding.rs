//! # M-Bus Data Encoding and Decoding
//!
//! This module provides functions for encoding and decoding the primitive data
//! types carried in M-Bus data records: little-endian integers, BCD, 32-bit
//! reals, reversed ASCII strings, manufacturer codes and the compound
//! date/time types G, F and I.
//!
//! All multi-byte values are transmitted least significant byte first.

use crate::error::MBusError;
use crate::util::hex::format_hex_compact;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

/// Decodes a little-endian two's complement integer of 1 to 8 bytes.
pub fn decode_int(data: &[u8]) -> Result<i64, MBusError> {
    if data.is_empty() || data.len() > 8 {
        return Err(MBusError::FrameParseError(format!(
            "invalid integer size: {}",
            data.len()
        )));
    }
    let raw = decode_uint(data)?;
    let bits = data.len() * 8;
    if bits == 64 {
        return Ok(raw as i64);
    }
    // sign extend from the highest transmitted bit
    let shift = 64 - bits;
    Ok(((raw << shift) as i64) >> shift)
}

/// Decodes a little-endian unsigned integer of up to 8 bytes.
pub fn decode_uint(data: &[u8]) -> Result<u64, MBusError> {
    if data.len() > 8 {
        return Err(MBusError::FrameParseError(format!(
            "invalid integer size: {}",
            data.len()
        )));
    }
    Ok(data
        .iter()
        .rev()
        .fold(0u64, |acc, &byte| (acc << 8) | byte as u64))
}

/// Decodes a little-endian BCD value.
///
/// A high nibble of 0xF in the most significant byte marks a negative
/// number. Any other nibble above 9 is rejected, as are values beyond the
/// range of `i64` (more than 18 digits).
pub fn decode_bcd(data: &[u8]) -> Result<i64, MBusError> {
    let mut value: i64 = 0;
    let mut negative = false;

    for (idx, &byte) in data.iter().enumerate().rev() {
        let mut tens = byte >> 4;
        let ones = byte & 0x0F;
        if idx == data.len() - 1 && tens == 0x0F {
            negative = true;
            tens = 0;
        }
        if tens > 9 || ones > 9 {
            return Err(MBusError::InvalidBcd(byte));
        }
        value = value
            .checked_mul(100)
            .and_then(|v| v.checked_add((tens as i64) * 10 + ones as i64))
            .ok_or_else(|| {
                MBusError::FrameParseError(format!("BCD value of {} bytes overflows", data.len()))
            })?;
    }

    Ok(if negative { -value } else { value })
}

/// Encodes a non-negative integer into `size` little-endian BCD bytes.
pub fn encode_bcd(mut value: u64, size: usize) -> Vec<u8> {
    let mut result = vec![0u8; size];
    for byte in result.iter_mut() {
        let ones = (value % 10) as u8;
        value /= 10;
        let tens = (value % 10) as u8;
        value /= 10;
        *byte = (tens << 4) | ones;
    }
    result
}

/// Decodes a 32-bit IEEE 754 real.
pub fn decode_real(data: &[u8]) -> Result<f32, MBusError> {
    let bytes: [u8; 4] = data
        .try_into()
        .map_err(|_| MBusError::FrameParseError(format!("invalid real size: {}", data.len())))?;
    Ok(f32::from_le_bytes(bytes))
}

/// Decodes an ASCII string, which is transmitted last character first.
pub fn decode_string(data: &[u8]) -> String {
    data.iter().rev().map(|&b| b as char).collect()
}

/// Renders binary data as space separated upper-case hex pairs.
pub fn decode_bin(data: &[u8]) -> String {
    format_hex_compact(data)
}

/// Encodes the manufacturer ID according to the manufacturer's 3-letter code.
///
/// Returns the 16-bit identifier; on the wire it is sent little-endian.
pub fn mbus_data_manufacturer_encode(manufacturer: &str) -> Result<u16, MBusError> {
    let bytes = manufacturer.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(|c| c.is_ascii_uppercase()) {
        return Err(MBusError::InvalidManufacturer);
    }

    let id = bytes
        .iter()
        .fold(0u16, |acc, &c| (acc << 5) | ((c - 64) as u16 & 0x1F));

    Ok(id)
}

/// Decodes the 3-letter manufacturer code from its 16-bit identifier.
pub fn mbus_decode_manufacturer(id: u16) -> String {
    [10u16, 5, 0]
        .iter()
        .map(|shift| {
            let letter = (id >> shift) & 0x1F;
            char::from_u32(letter as u32 + 64).unwrap_or('?')
        })
        .collect()
}

/// Which compound date/time type a value was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DateTimeKind {
    /// Type G, 2 bytes: date only
    Date,
    /// Type F, 4 bytes: date, hour and minute
    DateTime,
    /// Type I, 6 bytes: date and time with seconds
    DateTimeSeconds,
}

/// A decoded M-Bus date or date/time.
///
/// Field values are kept as transmitted. `is_valid` reports whether they form
/// a real calendar moment and the device did not set the invalid flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MBusDateTime {
    pub kind: DateTimeKind,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Device reported the value as invalid (IV bit)
    pub invalid: bool,
    pub summer_time: bool,
}

impl MBusDateTime {
    /// Converts to a chrono timestamp if the fields form a valid calendar moment.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?.and_hms_opt(
            self.hour as u32,
            self.minute as u32,
            self.second as u32,
        )
    }

    pub fn is_valid(&self) -> bool {
        !self.invalid && self.to_naive().is_some()
    }
}

impl std::fmt::Display for MBusDateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)?;
        match self.kind {
            DateTimeKind::Date => Ok(()),
            DateTimeKind::DateTime => write!(f, "T{:02}:{:02}", self.hour, self.minute),
            DateTimeKind::DateTimeSeconds => write!(
                f,
                "T{:02}:{:02}:{:02}",
                self.hour, self.minute, self.second
            ),
        }
    }
}

fn compound_year(day_byte: u8, month_byte: u8) -> u16 {
    2000 + ((((day_byte & 0xE0) >> 5) | ((month_byte & 0xF0) >> 1)) as u16)
}

/// Decodes a compound date/time of type G (2 bytes), F (4 bytes) or I (6 bytes).
pub fn decode_mbus_time(data: &[u8]) -> Result<MBusDateTime, MBusError> {
    match data.len() {
        2 => Ok(MBusDateTime {
            kind: DateTimeKind::Date,
            year: compound_year(data[0], data[1]),
            month: data[1] & 0x0F,
            day: data[0] & 0x1F,
            hour: 0,
            minute: 0,
            second: 0,
            invalid: false,
            summer_time: false,
        }),
        4 => Ok(MBusDateTime {
            kind: DateTimeKind::DateTime,
            year: compound_year(data[2], data[3]),
            month: data[3] & 0x0F,
            day: data[2] & 0x1F,
            hour: data[1] & 0x1F,
            minute: data[0] & 0x3F,
            second: 0,
            invalid: data[0] & 0x80 != 0,
            summer_time: data[1] & 0x80 != 0,
        }),
        6 => Ok(MBusDateTime {
            kind: DateTimeKind::DateTimeSeconds,
            year: compound_year(data[3], data[4]),
            month: data[4] & 0x0F,
            day: data[3] & 0x1F,
            hour: data[2] & 0x1F,
            minute: data[1] & 0x3F,
            second: data[0] & 0x3F,
            invalid: data[1] & 0x80 != 0,
            summer_time: data[2] & 0x80 != 0,
        }),
        len => Err(MBusError::FrameParseError(format!(
            "invalid time data length: {len}"
        ))),
    }
}
