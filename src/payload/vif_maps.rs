//! VIF/VIFE Mapping Tables and Lookup Functions
//!
//! This module provides lookups for M-Bus Value Information Fields (VIF)
//! and Value Information Field Extensions (VIFE) as defined in EN 13757-3.
//!
//! Each table row covers a contiguous code range. For decimal rows the
//! exponent of the first code is stored and grows by one per code; duration
//! rows select their time unit from the two lowest code bits.

/// How a table row derives unit and exponent from the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VifScale {
    /// `unit × 10^(base + code - first)`
    Decimal(i8),
    /// Time unit from the low two bits: s, min, h, day
    Duration,
    /// Time unit from the low two bits: h, day, month, year
    LongDuration,
    /// No numeric scaling (identifiers, counters, flags)
    Plain,
}

/// One resolved table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VifEntry {
    /// Code in the combined numbering: primary 0x00-0x7F, FD table 0x100+, FB table 0x200+
    pub code: u16,
    pub unit: &'static str,
    pub exponent: i32,
    pub quantity: &'static str,
}

type VifRow = (u8, u8, &'static str, VifScale, &'static str);

const DURATION_UNITS: [&str; 4] = ["s", "min", "h", "day"];
const LONG_DURATION_UNITS: [&str; 4] = ["h", "day", "month", "year"];

/// Primary VIF codes (VIF & 0x7F). 0x7B, 0x7C, 0x7D, 0x7F are handled by the
/// chain parser (extension selectors, plain text, manufacturer specific).
pub const VIF_CODES: &[VifRow] = &[
    (0x00, 0x07, "Wh", VifScale::Decimal(-3), "Energy"),
    (0x08, 0x0F, "J", VifScale::Decimal(0), "Energy"),
    (0x10, 0x17, "m^3", VifScale::Decimal(-6), "Volume"),
    (0x18, 0x1F, "kg", VifScale::Decimal(-3), "Mass"),
    (0x20, 0x23, "", VifScale::Duration, "On time"),
    (0x24, 0x27, "", VifScale::Duration, "Operating time"),
    (0x28, 0x2F, "W", VifScale::Decimal(-3), "Power"),
    (0x30, 0x37, "J/h", VifScale::Decimal(0), "Power"),
    (0x38, 0x3F, "m^3/h", VifScale::Decimal(-6), "Volume flow"),
    (0x40, 0x47, "m^3/min", VifScale::Decimal(-7), "Volume flow"),
    (0x48, 0x4F, "m^3/s", VifScale::Decimal(-9), "Volume flow"),
    (0x50, 0x57, "kg/h", VifScale::Decimal(-3), "Mass flow"),
    (0x58, 0x5B, "°C", VifScale::Decimal(-3), "Flow temperature"),
    (0x5C, 0x5F, "°C", VifScale::Decimal(-3), "Return temperature"),
    (0x60, 0x63, "K", VifScale::Decimal(-3), "Temperature difference"),
    (0x64, 0x67, "°C", VifScale::Decimal(-3), "External temperature"),
    (0x68, 0x6B, "bar", VifScale::Decimal(-3), "Pressure"),
    (0x6C, 0x6C, "", VifScale::Plain, "Time point (date)"),
    (0x6D, 0x6D, "", VifScale::Plain, "Time point (date & time)"),
    (0x6E, 0x6E, "Units for H.C.A.", VifScale::Plain, "H.C.A."),
    (0x70, 0x73, "", VifScale::Duration, "Averaging duration"),
    (0x74, 0x77, "", VifScale::Duration, "Actuality duration"),
    (0x78, 0x78, "", VifScale::Plain, "Fabrication number"),
    (0x79, 0x79, "", VifScale::Plain, "(Enhanced) Identification"),
    (0x7A, 0x7A, "", VifScale::Plain, "Bus address"),
    (0x7E, 0x7E, "", VifScale::Plain, "Any VIF"),
];

/// Main VIFE code extension table (VIF = 0xFD).
pub const VIFE_FD_CODES: &[VifRow] = &[
    (0x00, 0x03, "Currency units", VifScale::Decimal(-3), "Credit"),
    (0x04, 0x07, "Currency units", VifScale::Decimal(-3), "Debit"),
    (0x08, 0x08, "", VifScale::Plain, "Access number (transmission count)"),
    (0x09, 0x09, "", VifScale::Plain, "Medium"),
    (0x0A, 0x0A, "", VifScale::Plain, "Manufacturer"),
    (0x0B, 0x0B, "", VifScale::Plain, "Parameter set identification"),
    (0x0C, 0x0C, "", VifScale::Plain, "Model / Version"),
    (0x0D, 0x0D, "", VifScale::Plain, "Hardware version"),
    (0x0E, 0x0E, "", VifScale::Plain, "Firmware version"),
    (0x0F, 0x0F, "", VifScale::Plain, "Software version"),
    (0x10, 0x10, "", VifScale::Plain, "Customer location"),
    (0x11, 0x11, "", VifScale::Plain, "Customer"),
    (0x12, 0x12, "", VifScale::Plain, "Access code user"),
    (0x13, 0x13, "", VifScale::Plain, "Access code operator"),
    (0x14, 0x14, "", VifScale::Plain, "Access code system operator"),
    (0x15, 0x15, "", VifScale::Plain, "Access code developer"),
    (0x16, 0x16, "", VifScale::Plain, "Password"),
    (0x17, 0x17, "", VifScale::Plain, "Error flags"),
    (0x18, 0x18, "", VifScale::Plain, "Error mask"),
    (0x1A, 0x1A, "", VifScale::Plain, "Digital output (binary)"),
    (0x1B, 0x1B, "", VifScale::Plain, "Digital input (binary)"),
    (0x1C, 0x1C, "Baud", VifScale::Plain, "Baudrate"),
    (0x1D, 0x1D, "Bittimes", VifScale::Plain, "Response delay time"),
    (0x1E, 0x1E, "", VifScale::Plain, "Retry"),
    (0x20, 0x20, "", VifScale::Plain, "First storage number for cyclic storage"),
    (0x21, 0x21, "", VifScale::Plain, "Last storage number for cyclic storage"),
    (0x22, 0x22, "", VifScale::Plain, "Size of storage block"),
    (0x24, 0x27, "", VifScale::Duration, "Storage interval"),
    (0x28, 0x28, "month", VifScale::Plain, "Storage interval"),
    (0x29, 0x29, "year", VifScale::Plain, "Storage interval"),
    (0x2C, 0x2F, "", VifScale::Duration, "Duration since last readout"),
    (0x30, 0x30, "", VifScale::Plain, "Start (date/time) of tariff"),
    (0x31, 0x33, "", VifScale::Duration, "Duration of tariff"),
    (0x34, 0x37, "", VifScale::Duration, "Period of tariff"),
    (0x38, 0x38, "month", VifScale::Plain, "Period of tariff"),
    (0x39, 0x39, "year", VifScale::Plain, "Period of tariff"),
    (0x3A, 0x3A, "", VifScale::Plain, "Dimensionless"),
    (0x40, 0x4F, "V", VifScale::Decimal(-9), "Voltage"),
    (0x50, 0x5F, "A", VifScale::Decimal(-12), "Current"),
    (0x60, 0x60, "", VifScale::Plain, "Reset counter"),
    (0x61, 0x61, "", VifScale::Plain, "Cumulation counter"),
    (0x62, 0x62, "", VifScale::Plain, "Control signal"),
    (0x63, 0x63, "", VifScale::Plain, "Day of week"),
    (0x64, 0x64, "", VifScale::Plain, "Week number"),
    (0x65, 0x65, "", VifScale::Plain, "Time point of day change"),
    (0x66, 0x66, "", VifScale::Plain, "State of parameter activation"),
    (0x67, 0x67, "", VifScale::Plain, "Special supplier information"),
    (0x68, 0x6B, "", VifScale::LongDuration, "Duration since last cumulation"),
    (0x6C, 0x6F, "", VifScale::LongDuration, "Operating time battery"),
    (0x70, 0x70, "", VifScale::Plain, "Date and time of battery change"),
];

/// Alternate VIFE code extension table (VIF = 0xFB).
pub const VIFE_FB_CODES: &[VifRow] = &[
    (0x00, 0x01, "MWh", VifScale::Decimal(-1), "Energy"),
    (0x08, 0x09, "GJ", VifScale::Decimal(-1), "Energy"),
    (0x10, 0x11, "m^3", VifScale::Decimal(2), "Volume"),
    (0x18, 0x19, "t", VifScale::Decimal(2), "Mass"),
    (0x21, 0x21, "feet^3", VifScale::Decimal(-1), "Volume"),
    (0x22, 0x22, "american gallon", VifScale::Decimal(-1), "Volume"),
    (0x23, 0x23, "american gallon", VifScale::Decimal(0), "Volume"),
    (0x24, 0x24, "american gallon/min", VifScale::Decimal(-3), "Volume flow"),
    (0x25, 0x25, "american gallon/min", VifScale::Decimal(0), "Volume flow"),
    (0x26, 0x26, "american gallon/h", VifScale::Decimal(0), "Volume flow"),
    (0x28, 0x29, "MW", VifScale::Decimal(-1), "Power"),
    (0x30, 0x31, "GJ/h", VifScale::Decimal(-1), "Power"),
    (0x58, 0x5B, "°F", VifScale::Decimal(-3), "Flow temperature"),
    (0x5C, 0x5F, "°F", VifScale::Decimal(-3), "Return temperature"),
    (0x60, 0x63, "°F", VifScale::Decimal(-3), "Temperature difference"),
    (0x64, 0x67, "°F", VifScale::Decimal(-3), "External temperature"),
    (0x70, 0x73, "°F", VifScale::Decimal(-3), "Cold / Warm Temperature Limit"),
    (0x74, 0x77, "°C", VifScale::Decimal(-3), "Cold / Warm Temperature Limit"),
    (0x78, 0x7F, "W", VifScale::Decimal(-3), "Cumulative count max power"),
];

/// Effect of a combinable (orthogonal) VIFE on the record it follows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VifeAction {
    /// Appends a description to the quantity ("per hour", "upper limit value", ...).
    Describe(&'static str),
    /// Adds to the decimal exponent.
    Exponent(i32),
    /// Marks the record as an additive correction constant of `10^n` in the
    /// unit of the VIF. The value itself is left as transmitted.
    AdditiveCorrection(i32),
    /// Record error code 0x00-0x1F.
    ErrorCode(u8),
    /// The value was recorded during an error state.
    ValueDuringError,
    /// Remaining VIFEs of this block are manufacturer specific.
    ManufacturerSpecific,
}

const COMBINABLE_DESCRIPTIONS: &[(u8, &str)] = &[
    (0x20, "per second"),
    (0x21, "per minute"),
    (0x22, "per hour"),
    (0x23, "per day"),
    (0x24, "per week"),
    (0x25, "per month"),
    (0x26, "per year"),
    (0x27, "per revolution / measurement"),
    (0x28, "increment per input pulse on input channel #0"),
    (0x29, "increment per input pulse on input channel #1"),
    (0x2A, "increment per output pulse on output channel #0"),
    (0x2B, "increment per output pulse on output channel #1"),
    (0x2C, "per litre"),
    (0x2D, "per m^3"),
    (0x2E, "per kg"),
    (0x2F, "per K"),
    (0x30, "per kWh"),
    (0x31, "per GJ"),
    (0x32, "per kW"),
    (0x33, "per (K*l)"),
    (0x34, "per V"),
    (0x35, "per A"),
    (0x36, "multiplied by s"),
    (0x37, "multiplied by s / V"),
    (0x38, "multiplied by s / A"),
    (0x39, "start date(/time) of"),
    (0x3A, "uncorrected unit"),
    (0x3B, "accumulation only if positive contributions"),
    (0x3C, "accumulation of abs value only if negative contributions"),
    (0x40, "lower limit value"),
    (0x41, "number of exceeds of lower limit"),
    (0x42, "date of begin of first lower limit exceed"),
    (0x43, "date of end of first lower limit exceed"),
    (0x46, "date of begin of last lower limit exceed"),
    (0x47, "date of end of last lower limit exceed"),
    (0x48, "upper limit value"),
    (0x49, "number of exceeds of upper limit"),
    (0x4A, "date of begin of first upper limit exceed"),
    (0x4B, "date of end of first upper limit exceed"),
    (0x4E, "date of begin of last upper limit exceed"),
    (0x4F, "date of end of last upper limit exceed"),
    (0x68, "value during lower value limit exceed"),
    (0x69, "leakage values"),
    (0x6C, "value during upper value limit exceed"),
    (0x6D, "overflow values"),
    (0x7E, "future value"),
];

/// Looks up a combinable VIFE (code without extension bit).
pub fn lookup_combinable_vife(code: u8) -> Option<VifeAction> {
    let code = code & 0x7F;
    match code {
        0x00..=0x1F => Some(VifeAction::ErrorCode(code)),
        0x50..=0x5F => Some(VifeAction::Describe(if code & 0x08 == 0 {
            "duration of lower limit exceed"
        } else {
            "duration of upper limit exceed"
        })),
        0x60..=0x67 => Some(VifeAction::Describe("duration of limit exceed")),
        0x6A | 0x6B | 0x6E | 0x6F => Some(VifeAction::ValueDuringError),
        0x70..=0x77 => Some(VifeAction::Exponent((code & 0x07) as i32 - 6)),
        0x78..=0x7B => Some(VifeAction::AdditiveCorrection((code & 0x03) as i32 - 3)),
        0x7D => Some(VifeAction::Exponent(3)),
        0x7F => Some(VifeAction::ManufacturerSpecific),
        _ => COMBINABLE_DESCRIPTIONS
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, d)| VifeAction::Describe(d)),
    }
}

fn lookup_in(table: &[VifRow], code: u8, offset: u16) -> Option<VifEntry> {
    table
        .iter()
        .find(|(first, last, _, _, _)| (*first..=*last).contains(&code))
        .map(|(first, _, unit, scale, quantity)| {
            let (unit, exponent) = match scale {
                VifScale::Decimal(base) => (*unit, *base as i32 + (code - first) as i32),
                VifScale::Duration => (DURATION_UNITS[(code & 0x03) as usize], 0),
                VifScale::LongDuration => (LONG_DURATION_UNITS[(code & 0x03) as usize], 0),
                VifScale::Plain => (*unit, 0),
            };
            VifEntry {
                code: offset + code as u16,
                unit,
                exponent,
                quantity,
            }
        })
}

/// Looks up primary VIF code.
pub fn lookup_primary_vif(code: u8) -> Option<VifEntry> {
    lookup_in(VIF_CODES, code & 0x7F, 0)
}

/// Looks up VIFE FD extension code.
pub fn lookup_vife_fd(code: u8) -> Option<VifEntry> {
    lookup_in(VIFE_FD_CODES, code & 0x7F, 0x100)
}

/// Looks up VIFE FB extension code.
pub fn lookup_vife_fb(code: u8) -> Option<VifEntry> {
    lookup_in(VIFE_FB_CODES, code & 0x7F, 0x200)
}

/// Codes (combined numbering) whose value is a point in time.
pub fn is_time_point(code: u16) -> bool {
    matches!(code, 0x6C | 0x6D | 0x130 | 0x170)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_exponents() {
        let wh = lookup_primary_vif(0x00).unwrap();
        assert_eq!((wh.unit, wh.exponent), ("Wh", -3));
        let kwh = lookup_primary_vif(0x06).unwrap();
        assert_eq!((kwh.unit, kwh.exponent, kwh.quantity), ("Wh", 3, "Energy"));
    }

    #[test]
    fn test_extension_bit_ignored() {
        assert_eq!(lookup_primary_vif(0x93), lookup_primary_vif(0x13));
    }

    #[test]
    fn test_duration_units() {
        assert_eq!(lookup_primary_vif(0x22).unwrap().unit, "h");
        assert_eq!(lookup_primary_vif(0x27).unwrap().unit, "day");
        assert_eq!(lookup_vife_fd(0x31).unwrap().unit, "min");
        assert_eq!(lookup_vife_fd(0x6E).unwrap().unit, "month");
    }

    #[test]
    fn test_voltage_and_current() {
        let volt = lookup_vife_fd(0x49).unwrap();
        assert_eq!((volt.code, volt.unit, volt.exponent), (0x149, "V", 0));
        let amp = lookup_vife_fd(0x59).unwrap();
        assert_eq!((amp.unit, amp.exponent), ("A", -3));
    }

    #[test]
    fn test_reserved_codes_unknown() {
        assert!(lookup_primary_vif(0x6F).is_none());
        assert!(lookup_vife_fd(0x3C).is_none());
        assert!(lookup_vife_fd(0x75).is_none());
        assert!(lookup_vife_fb(0x40).is_none());
    }

    #[test]
    fn test_fb_table() {
        let mwh = lookup_vife_fb(0x01).unwrap();
        assert_eq!((mwh.code, mwh.unit, mwh.exponent), (0x201, "MWh", 0));
    }

    #[test]
    fn test_combinable_corrections() {
        assert_eq!(lookup_combinable_vife(0x73), Some(VifeAction::Exponent(-3)));
        assert_eq!(lookup_combinable_vife(0xFD), Some(VifeAction::Exponent(3)));
        assert_eq!(lookup_combinable_vife(0x79), Some(VifeAction::AdditiveCorrection(-2)));
        assert_eq!(
            lookup_combinable_vife(0x22),
            Some(VifeAction::Describe("per hour"))
        );
        assert_eq!(lookup_combinable_vife(0x3E), None);
    }
}
