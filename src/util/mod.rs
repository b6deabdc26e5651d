//! # Utility Modules
//!
//! Common helpers used throughout the mbus-request crate.

pub mod hex;

pub use hex::{decode_hex, format_hex_compact, parse_hex_lenient};
