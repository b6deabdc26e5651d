//! M-Bus Protocol Constants
//!
//! This module defines constants used in the M-Bus protocol implementation,
//! based on the EN 13757-2/-3 standards.

// ----------------------------------------------------------------------------
// Link layer framing
// ----------------------------------------------------------------------------

/// Single character acknowledgement
pub const MBUS_FRAME_ACK_START: u8 = 0xE5;

/// Start byte of a short frame
pub const MBUS_FRAME_SHORT_START: u8 = 0x10;

/// Start byte (sent twice) of a control or long frame
pub const MBUS_FRAME_LONG_START: u8 = 0x68;

/// Stop byte for short, control and long frames
pub const MBUS_FRAME_STOP: u8 = 0x16;

/// Total size of a short frame on the wire
pub const MBUS_FRAME_SHORT_SIZE: usize = 5;

/// Bytes of framing around the L-field content of a long frame
/// (0x68 L L 0x68 ... CS 0x16)
pub const MBUS_FRAME_LONG_OVERHEAD: usize = 6;

/// L-field value of a control frame (C, A, CI only)
pub const MBUS_FRAME_CONTROL_LENGTH: u8 = 3;

/// Largest payload a long frame can carry (L is one byte)
pub const MBUS_FRAME_MAX_PAYLOAD: usize = 252;

// ----------------------------------------------------------------------------
// Addresses
// ----------------------------------------------------------------------------

/// Network layer (secondary addressing) address
pub const MBUS_ADDRESS_NETWORK_LAYER: u8 = 0xFD;

/// Highest assignable primary address
pub const MBUS_ADDRESS_PRIMARY_MAX: u8 = 250;

// ----------------------------------------------------------------------------
// Control field
// ----------------------------------------------------------------------------

pub const MBUS_CONTROL_MASK_SND_NKE: u8 = 0x40;
pub const MBUS_CONTROL_MASK_SND_UD: u8 = 0x53; // includes DIR M2S
pub const MBUS_CONTROL_MASK_REQ_UD2: u8 = 0x5B; // includes DIR M2S
pub const MBUS_CONTROL_MASK_RSP_UD: u8 = 0x08; // S2M response

pub const MBUS_CONTROL_MASK_FCB: u8 = 0x20;

// ----------------------------------------------------------------------------
// Control information (CI) field
// ----------------------------------------------------------------------------

pub const MBUS_CONTROL_INFO_SELECT_SLAVE: u8 = 0x52;
pub const MBUS_CONTROL_INFO_ERROR_GENERAL: u8 = 0x70;
pub const MBUS_CONTROL_INFO_RESP_VARIABLE: u8 = 0x72;
pub const MBUS_CONTROL_INFO_RESP_FIXED: u8 = 0x73;
pub const MBUS_CONTROL_INFO_RESP_VARIABLE_MSB: u8 = 0x76;
pub const MBUS_CONTROL_INFO_RESP_FIXED_MSB: u8 = 0x77;

// ----------------------------------------------------------------------------
// Variable data structure
// ----------------------------------------------------------------------------

/// Size of the fixed header preceding the records of a variable data response
pub const MBUS_DATA_VARIABLE_HEADER_LENGTH: usize = 12;

/// DIF (Data Information Field) mask for data length
pub const MBUS_DATA_RECORD_DIF_MASK_DATA: u8 = 0x0F;

/// DIF mask for function
pub const MBUS_DATA_RECORD_DIF_MASK_FUNCTION: u8 = 0x30;

/// DIF mask for storage number
pub const MBUS_DATA_RECORD_DIF_MASK_STORAGE_NO: u8 = 0x40;

/// DIFE (Data Information Field Extension) mask for storage number
pub const MBUS_DATA_RECORD_DIFE_MASK_STORAGE_NO: u8 = 0x0F;

/// DIFE mask for tariff
pub const MBUS_DATA_RECORD_DIFE_MASK_TARIFF: u8 = 0x30;

/// DIFE mask for device (subunit)
pub const MBUS_DATA_RECORD_DIFE_MASK_DEVICE: u8 = 0x40;

/// DIF idle filler
pub const MBUS_DIB_DIF_IDLE_FILLER: u8 = 0x2F;

/// DIF manufacturer specific
pub const MBUS_DIB_DIF_MANUFACTURER_SPECIFIC: u8 = 0x0F;

/// DIF more records follow
pub const MBUS_DIB_DIF_MORE_RECORDS_FOLLOW: u8 = 0x1F;

/// DIF extension bit
pub const MBUS_DIB_DIF_EXTENSION_BIT: u8 = 0x80;

/// Maximum number of DIFE bytes in one data information block
pub const MBUS_DIB_DIFE_MAX: usize = 10;

/// VIF without extension
pub const MBUS_DIB_VIF_WITHOUT_EXTENSION: u8 = 0x7F;

/// VIF extension bit
pub const MBUS_DIB_VIF_EXTENSION_BIT: u8 = 0x80;

/// Maximum number of VIFE bytes in one value information block
pub const MBUS_DIB_VIFE_MAX: usize = 10;

/// Plain text VIF (ASCII unit follows)
pub const MBUS_VIF_PLAINTEXT: u8 = 0x7C;

/// Extension table selector: main VIFE code table
pub const MBUS_VIF_EXTENSION_FD: u8 = 0xFD;

/// Extension table selector: alternate VIFE code table
pub const MBUS_VIF_EXTENSION_FB: u8 = 0xFB;

/// Manufacturer specific VIF
pub const MBUS_VIF_MANUFACTURER_SPECIFIC: u8 = 0x7F;

// ----------------------------------------------------------------------------
// Fixed data structure (CI 0x73)
// ----------------------------------------------------------------------------

pub const MBUS_DATA_FIXED_LENGTH: usize = 16;
pub const MBUS_DATA_FIXED_STATUS_FORMAT_MASK: u8 = 0x80;
pub const MBUS_DATA_FIXED_STATUS_FORMAT_INT: u8 = 0x80;

// ----------------------------------------------------------------------------
// Secondary addressing
// ----------------------------------------------------------------------------

/// Number of hex digits in a secondary address mask
pub const MBUS_SECONDARY_ADDRESS_DIGITS: usize = 16;

/// Wildcard digit in a secondary address mask
pub const MBUS_SECONDARY_ADDRESS_WILDCARD: u8 = 0xF;
