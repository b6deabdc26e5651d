//! The payload module contains the components responsible for decoding the
//! application data carried by M-Bus response frames.

pub mod data;
pub mod data_encoding;
pub mod record;
pub mod vif;
pub mod vif_maps;

pub use data::{
    decode, decode_fixed, decode_frame, extend, DataHeader, FrameData, NormalizedRecord,
};
pub use record::{MBusRecord, MBusRecordValue, RecordFlags, RecordFunction};
pub use vif::{normalize_vib, parse_vib, VifInfo};
