//! Value information block parsing.
//!
//! A VIB is a primary VIF optionally followed by up to ten VIFE bytes, each
//! byte announcing a successor through its extension bit. `parse_vib` reads
//! the raw bytes; `normalize_vib` turns them into unit, exponent and quantity.

use crate::constants::*;
use crate::error::MBusError;
use crate::payload::data_encoding::decode_string;
use crate::payload::record::RecordFlags;
use crate::payload::vif_maps::{
    lookup_combinable_vife, lookup_primary_vif, lookup_vife_fb, lookup_vife_fd, VifEntry,
    VifeAction,
};
use nom::{bytes::complete::take, number::complete::u8 as byte};

/// Raw value information block as transmitted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValueInformationBlock {
    pub vif: u8,
    pub vife: Vec<u8>,
    /// Unit text of a plain text VIF (0x7C / 0xFC)
    pub custom_vif: String,
}

/// Interpretation of a value information block.
#[derive(Debug, Clone, PartialEq)]
pub struct VifInfo {
    /// Primary 0x00-0x7F, FD table 0x100+, FB table 0x200+
    pub code: u16,
    pub unit: String,
    pub exponent: i32,
    pub quantity: String,
    /// Exponent of an additive correction constant (VIFE 0x78-0x7B)
    pub additive_correction: Option<i32>,
    pub error_code: Option<u8>,
    pub flags: RecordFlags,
}

fn next_byte(input: &[u8]) -> Result<(&[u8], u8), MBusError> {
    byte::<_, nom::error::Error<&[u8]>>(input).map_err(|_| MBusError::PrematureEndAtData)
}

/// Reads a VIF, its plain text unit if any, and the VIFE chain.
pub fn parse_vib(input: &[u8]) -> Result<(&[u8], ValueInformationBlock), MBusError> {
    let (mut input, vif) = next_byte(input)?;
    let mut vib = ValueInformationBlock {
        vif,
        ..Default::default()
    };

    if vif & MBUS_DIB_VIF_WITHOUT_EXTENSION == MBUS_VIF_PLAINTEXT {
        let (rest, len) = next_byte(input)?;
        let (rest, text) = take::<_, _, nom::error::Error<&[u8]>>(len as usize)(rest)
            .map_err(|_| MBusError::PrematureEndAtData)?;
        vib.custom_vif = decode_string(text);
        input = rest;
    }

    let mut extended = vif & MBUS_DIB_VIF_EXTENSION_BIT != 0;
    while extended {
        if vib.vife.len() == MBUS_DIB_VIFE_MAX {
            return Err(MBusError::VifChainTooLong);
        }
        let (rest, vife) = next_byte(input)?;
        vib.vife.push(vife);
        extended = vife & MBUS_DIB_VIF_EXTENSION_BIT != 0;
        input = rest;
    }

    Ok((input, vib))
}

fn unknown(code: u16) -> VifInfo {
    VifInfo {
        code,
        unit: String::new(),
        exponent: 0,
        quantity: "Unknown".to_string(),
        additive_correction: None,
        error_code: None,
        flags: RecordFlags::UNKNOWN_UNIT,
    }
}

fn from_entry(entry: VifEntry) -> VifInfo {
    VifInfo {
        code: entry.code,
        unit: entry.unit.to_string(),
        exponent: entry.exponent,
        quantity: entry.quantity.to_string(),
        additive_correction: None,
        error_code: None,
        flags: RecordFlags::empty(),
    }
}

/// Resolves unit, exponent and quantity of a VIB.
///
/// Unknown codes never fail: the result carries an empty unit and the
/// `UNKNOWN_UNIT` flag, so the caller can keep the record and move on.
pub fn normalize_vib(vib: &ValueInformationBlock) -> VifInfo {
    let (mut info, combinable) = match vib.vif {
        MBUS_VIF_EXTENSION_FD | MBUS_VIF_EXTENSION_FB => {
            let Some((&code, rest)) = vib.vife.split_first() else {
                return unknown(vib.vif as u16);
            };
            let (entry, table) = if vib.vif == MBUS_VIF_EXTENSION_FD {
                (lookup_vife_fd(code), 0x100)
            } else {
                (lookup_vife_fb(code), 0x200)
            };
            match entry {
                Some(entry) => (from_entry(entry), rest),
                None => return unknown(table + (code & 0x7F) as u16),
            }
        }
        vif if vif & MBUS_DIB_VIF_WITHOUT_EXTENSION == MBUS_VIF_PLAINTEXT => {
            let info = VifInfo {
                code: MBUS_VIF_PLAINTEXT as u16,
                unit: vib.custom_vif.clone(),
                exponent: 0,
                quantity: "Plain text".to_string(),
                additive_correction: None,
                error_code: None,
                flags: RecordFlags::empty(),
            };
            (info, vib.vife.as_slice())
        }
        vif if vif & MBUS_DIB_VIF_WITHOUT_EXTENSION == MBUS_VIF_MANUFACTURER_SPECIFIC => {
            let mut info = unknown(MBUS_VIF_MANUFACTURER_SPECIFIC as u16);
            info.quantity = "Manufacturer specific".to_string();
            info.flags = RecordFlags::MANUFACTURER_SPECIFIC;
            return info;
        }
        vif => match lookup_primary_vif(vif) {
            Some(entry) => (from_entry(entry), vib.vife.as_slice()),
            None => return unknown((vif & MBUS_DIB_VIF_WITHOUT_EXTENSION) as u16),
        },
    };

    for &vife in combinable {
        match lookup_combinable_vife(vife) {
            Some(VifeAction::Describe(text)) => {
                info.quantity = format!("{} ({})", info.quantity, text);
            }
            Some(VifeAction::Exponent(n)) => info.exponent += n,
            Some(VifeAction::AdditiveCorrection(n)) => {
                info.additive_correction = Some(n);
                info.quantity = format!("{} (additive correction constant 10^{n})", info.quantity);
            }
            Some(VifeAction::ErrorCode(code)) => {
                info.error_code = Some(code);
                info.flags |= RecordFlags::RECORD_ERROR;
            }
            Some(VifeAction::ValueDuringError) => info.flags |= RecordFlags::VALUE_DURING_ERROR,
            Some(VifeAction::ManufacturerSpecific) => {
                info.flags |= RecordFlags::MANUFACTURER_SPECIFIC;
                break;
            }
            None => {
                log::debug!("Unknown combinable VIFE 0x{vife:02X}");
                info.flags |= RecordFlags::UNKNOWN_VIFE;
            }
        }
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_vib_single() {
        let (rest, vib) = parse_vib(&[0x13, 0xAA]).unwrap();
        assert_eq!(rest, &[0xAA]);
        assert_eq!(vib.vif, 0x13);
        assert!(vib.vife.is_empty());
    }

    #[test]
    fn test_parse_vib_with_extensions() {
        let (rest, vib) = parse_vib(&[0xFD, 0x9B, 0x22, 0x01]).unwrap();
        assert_eq!(rest, &[0x01]);
        assert_eq!(vib.vife, vec![0x9B, 0x22]);
    }

    #[test]
    fn test_parse_vib_plaintext() {
        let (rest, vib) = parse_vib(&[0x7C, 0x03, b'h', b'W', b'k', 0x05]).unwrap();
        assert_eq!(rest, &[0x05]);
        assert_eq!(vib.custom_vif, "kWh");
        assert_eq!(normalize_vib(&vib).unit, "kWh");
    }

    #[test]
    fn test_parse_vib_chain_too_long() {
        let mut input = vec![0x93];
        input.extend(std::iter::repeat(0xA2).take(MBUS_DIB_VIFE_MAX));
        assert!(matches!(parse_vib(&input), Err(MBusError::VifChainTooLong)));
    }

    #[test]
    fn test_parse_vib_truncated() {
        assert!(matches!(
            parse_vib(&[0x93]),
            Err(MBusError::PrematureEndAtData)
        ));
    }

    #[test]
    fn test_normalize_primary() {
        let info = normalize_vib(&ValueInformationBlock {
            vif: 0x13,
            ..Default::default()
        });
        assert_eq!((info.unit.as_str(), info.exponent), ("m^3", -3));
        assert_eq!(info.quantity, "Volume");
        assert!(info.flags.is_empty());
    }

    #[test]
    fn test_normalize_fd_extension() {
        let info = normalize_vib(&ValueInformationBlock {
            vif: 0xFD,
            vife: vec![0x17],
            ..Default::default()
        });
        assert_eq!(info.code, 0x117);
        assert_eq!(info.quantity, "Error flags");
    }

    #[test]
    fn test_normalize_unknown_extension_degrades() {
        let info = normalize_vib(&ValueInformationBlock {
            vif: 0xFD,
            vife: vec![0x3C],
            ..Default::default()
        });
        assert_eq!(info.unit, "");
        assert!(info.flags.contains(RecordFlags::UNKNOWN_UNIT));
    }

    #[test]
    fn test_normalize_combinable_correction() {
        // Wh with multiplicative correction 10^-3 and "per hour"
        let info = normalize_vib(&ValueInformationBlock {
            vif: 0x83,
            vife: vec![0xF3, 0x22],
            ..Default::default()
        });
        assert_eq!(info.exponent, -3);
        assert_eq!(info.quantity, "Energy (per hour)");
    }

    #[test]
    fn test_normalize_additive_correction() {
        // volume in 10^-3 m^3, additive correction constant 10^0
        let info = normalize_vib(&ValueInformationBlock {
            vif: 0x93,
            vife: vec![0x7B],
            ..Default::default()
        });
        assert_eq!(info.exponent, -3);
        assert_eq!(info.additive_correction, Some(0));
        assert_eq!(info.quantity, "Volume (additive correction constant 10^0)");
    }

    #[test]
    fn test_normalize_error_code() {
        let info = normalize_vib(&ValueInformationBlock {
            vif: 0x83,
            vife: vec![0x15],
            ..Default::default()
        });
        assert_eq!(info.error_code, Some(0x15));
        assert!(info.flags.contains(RecordFlags::RECORD_ERROR));
    }

    proptest! {
        #[test]
        fn prop_parse_vib_never_overruns(bytes in proptest::collection::vec(any::<u8>(), 0..24)) {
            if let Ok((rest, vib)) = parse_vib(&bytes) {
                prop_assert!(vib.vife.len() <= MBUS_DIB_VIFE_MAX);
                prop_assert!(rest.len() < bytes.len());
                let _ = normalize_vib(&vib);
            }
        }
    }
}
