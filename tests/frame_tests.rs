//! Tests for the frame codec: parsing, packing and the streaming properties
//! the transports rely on.

use mbus_request::error::FrameError;
use mbus_request::mbus::frame::{
    calculate_checksum, pack_frame, parse_frame, ping_frame, request_data_frame, verify_frame,
    DecodeOutcome, MBusFrame, MBusFrameType,
};
use proptest::prelude::*;

fn complete(bytes: &[u8]) -> (MBusFrame, usize) {
    match parse_frame(bytes) {
        DecodeOutcome::Complete { frame, consumed } => (frame, consumed),
        other => panic!("expected a complete frame, got {other:?}"),
    }
}

/// Tests that an ACK frame is correctly parsed.
#[test]
fn test_parse_ack_frame() {
    let (frame, consumed) = complete(&[0xE5]);
    assert_eq!(frame.frame_type, MBusFrameType::Ack);
    assert_eq!(consumed, 1);
    assert!(frame.is_ack());
}

/// Tests that a Short frame is correctly parsed.
#[test]
fn test_parse_short_frame() {
    let (frame, consumed) = complete(&[0x10, 0x5B, 0x01, 0x5C, 0x16]);
    assert_eq!(frame.frame_type, MBusFrameType::Short);
    assert_eq!(frame.control, 0x5B);
    assert_eq!(frame.address, 0x01);
    assert_eq!(frame.checksum, 0x5C);
    assert_eq!(consumed, 5);
}

/// Tests that a Control frame is correctly parsed.
#[test]
fn test_parse_control_frame() {
    let (frame, _) = complete(&[0x68, 0x03, 0x03, 0x68, 0x53, 0x01, 0x00, 0x54, 0x16]);
    assert_eq!(frame.frame_type, MBusFrameType::Control);
    assert_eq!(frame.control_information, 0x00);
    assert!(frame.data.is_empty());
}

/// Tests that a Long frame is correctly parsed.
#[test]
fn test_parse_long_frame() {
    let bytes = [
        0x68, 0x08, 0x08, 0x68, 0x53, 0x01, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x63, 0x16,
    ];
    let (frame, consumed) = complete(&bytes);
    assert_eq!(frame.frame_type, MBusFrameType::Long);
    assert_eq!(frame.data, &[0x01, 0x02, 0x03, 0x04, 0x05]);
    assert_eq!(frame.checksum, 0x63);
    assert_eq!(consumed, bytes.len());
}

#[test]
fn test_trailing_bytes_are_not_consumed() {
    let (frame, consumed) = complete(&[0x10, 0x40, 0x05, 0x45, 0x16, 0xE5, 0x10]);
    assert_eq!(frame, ping_frame(5));
    assert_eq!(consumed, 5);
}

#[test]
fn test_need_more_bytes() {
    assert_eq!(parse_frame(&[]), DecodeOutcome::NeedMoreBytes(1));
    assert_eq!(parse_frame(&[0x10, 0x40]), DecodeOutcome::NeedMoreBytes(3));
    assert_eq!(parse_frame(&[0x68]), DecodeOutcome::NeedMoreBytes(2));
    // L = 8: the frame is 14 bytes long
    assert_eq!(
        parse_frame(&[0x68, 0x08, 0x08, 0x68, 0x53]),
        DecodeOutcome::NeedMoreBytes(9)
    );
}

#[test]
fn test_malformed_frames() {
    assert_eq!(
        parse_frame(&[0x42]),
        DecodeOutcome::Malformed(FrameError::InvalidStartByte(0x42))
    );
    assert_eq!(
        parse_frame(&[0x68, 0x08, 0x07, 0x68]),
        DecodeOutcome::Malformed(FrameError::LengthMismatch {
            first: 0x08,
            second: 0x07
        })
    );
    assert_eq!(
        parse_frame(&[0x68, 0x03, 0x03, 0x42]),
        DecodeOutcome::Malformed(FrameError::InvalidSecondStartByte(0x42))
    );
    assert_eq!(
        parse_frame(&[0x10, 0x40, 0x05, 0x46, 0x16]),
        DecodeOutcome::Malformed(FrameError::InvalidChecksum {
            expected: 0x46,
            calculated: 0x45
        })
    );
    assert_eq!(
        parse_frame(&[0x10, 0x40, 0x05, 0x45, 0x17]),
        DecodeOutcome::Malformed(FrameError::InvalidStopByte(0x17))
    );
}

#[test]
fn test_pack_request_frames() {
    assert_eq!(pack_frame(&ping_frame(5)).unwrap(), vec![0x10, 0x40, 0x05, 0x45, 0x16]);
    assert_eq!(
        pack_frame(&request_data_frame(0xFD, false)).unwrap(),
        vec![0x10, 0x5B, 0xFD, 0x58, 0x16]
    );
    assert_eq!(
        pack_frame(&request_data_frame(0xFD, true)).unwrap(),
        vec![0x10, 0x7B, 0xFD, 0x78, 0x16]
    );
}

#[test]
fn test_pack_ack() {
    assert_eq!(pack_frame(&MBusFrame::ack()).unwrap(), vec![0xE5]);
}

#[test]
fn test_long_without_data_is_control() {
    let frame = MBusFrame::long(0x53, 0xFD, 0x52, &[]).unwrap();
    assert_eq!(frame.frame_type, MBusFrameType::Control);
    assert_eq!(pack_frame(&frame).unwrap()[1], 3);
}

#[test]
fn test_oversized_payload_rejected() {
    assert!(MBusFrame::long(0x08, 0x01, 0x72, &[0u8; 253]).is_err());
    assert!(MBusFrame::long(0x08, 0x01, 0x72, &[0u8; 252]).is_ok());
}

#[test]
fn test_pack_oversized_frame_built_by_hand() {
    let mut frame = MBusFrame::long(0x08, 0x01, 0x72, &[0u8; 252]).unwrap();
    assert_eq!(pack_frame(&frame).unwrap()[1], 255);

    frame.data.push(0);
    assert!(pack_frame(&frame).is_err());
}

#[test]
fn test_verify_frame() {
    let mut frame = MBusFrame::long(0x08, 0x01, 0x72, &[1, 2, 3]).unwrap();
    assert!(verify_frame(&frame).is_ok());
    frame.checksum = frame.checksum.wrapping_add(1);
    assert!(verify_frame(&frame).is_err());
    assert_eq!(calculate_checksum(&frame), frame.checksum.wrapping_sub(1));
}

fn long_frame() -> impl Strategy<Value = MBusFrame> {
    (
        any::<u8>(),
        any::<u8>(),
        any::<u8>(),
        proptest::collection::vec(any::<u8>(), 1..=252),
    )
        .prop_map(|(c, a, ci, data)| MBusFrame::long(c, a, ci, &data).unwrap())
}

fn short_frame() -> impl Strategy<Value = MBusFrame> {
    (any::<u8>(), any::<u8>()).prop_map(|(c, a)| MBusFrame::short(c, a))
}

proptest! {
    #[test]
    fn prop_long_frame_round_trip(frame in long_frame()) {
        let bytes = pack_frame(&frame).unwrap();
        prop_assert_eq!(
            parse_frame(&bytes),
            DecodeOutcome::Complete { frame: frame.clone(), consumed: bytes.len() }
        );
    }

    #[test]
    fn prop_long_frame_truncation(frame in long_frame(), cut in 3usize..1000) {
        let bytes = pack_frame(&frame).unwrap();
        let k = cut % bytes.len();
        prop_assume!(k >= 3);
        prop_assert_eq!(parse_frame(&bytes[..k]), DecodeOutcome::NeedMoreBytes(bytes.len() - k));
    }

    #[test]
    fn prop_short_frame_truncation(frame in short_frame(), k in 1usize..5) {
        let bytes = pack_frame(&frame).unwrap();
        prop_assert_eq!(parse_frame(&bytes[..k]), DecodeOutcome::NeedMoreBytes(bytes.len() - k));
    }

    #[test]
    fn prop_checksum_mutation_detected(frame in long_frame(), delta in 1u8..=255) {
        let mut bytes = pack_frame(&frame).unwrap();
        let checksum_pos = bytes.len() - 2;
        bytes[checksum_pos] = bytes[checksum_pos].wrapping_add(delta);
        let is_checksum_error = matches!(
            parse_frame(&bytes),
            DecodeOutcome::Malformed(FrameError::InvalidChecksum { .. })
        );
        prop_assert!(is_checksum_error);
    }

    #[test]
    fn prop_payload_mutation_detected(frame in long_frame(), index in any::<usize>(), delta in 1u8..=255) {
        let mut bytes = pack_frame(&frame).unwrap();
        // C, A, CI or a data byte
        let pos = 4 + index % (bytes.len() - 6);
        bytes[pos] = bytes[pos].wrapping_add(delta);
        let is_malformed = matches!(parse_frame(&bytes), DecodeOutcome::Malformed(_));
        prop_assert!(is_malformed);
    }

    #[test]
    fn prop_arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..300)) {
        if let DecodeOutcome::Complete { consumed, .. } = parse_frame(&bytes) {
            prop_assert!(consumed <= bytes.len());
        }
    }
}
