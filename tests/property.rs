//! Property-based tests for frame encoding, masking and the CSAP records.
//!
//! These use proptest to fuzz the decoders and check that nothing panics
//! on arbitrary input.

use bytes::BytesMut;
use csap::csap::{ControlFrame, Format, HandshakeReply, OpenRequest, WireFormat};
use csap::protocol::{Frame, FrameHeader, HttpRequestHead, OpCode, apply_mask, apply_mask_at, encode_frame};
use proptest::prelude::*;

fn data_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![
        Just(OpCode::Text),
        Just(OpCode::Binary),
        Just(OpCode::Continuation),
    ]
}

fn control_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![Just(OpCode::Close), Just(OpCode::Ping), Just(OpCode::Pong)]
}

fn encode(fin: bool, opcode: OpCode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_frame(&mut buf, fin, opcode, payload, mask);
    buf.to_vec()
}

proptest! {
    // =========================================================================
    // Frames survive encode then parse, masked or not
    // =========================================================================
    #[test]
    fn test_frame_survives_encoding(
        fin in any::<bool>(),
        opcode in data_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..1000),
        mask in prop::option::of(any::<[u8; 4]>())
    ) {
        let wire = encode(fin, opcode, &payload, mask);
        let (frame, consumed) = Frame::parse(&wire).unwrap();

        prop_assert_eq!(consumed, wire.len());
        prop_assert_eq!(frame.header.fin, fin);
        prop_assert_eq!(frame.header.opcode, opcode);
        prop_assert_eq!(frame.header.mask, mask);
        prop_assert_eq!(frame.payload, payload);
    }

    #[test]
    fn test_mask_reversible(
        data in prop::collection::vec(any::<u8>(), 0..260),
        mask in any::<[u8; 4]>()
    ) {
        let mut buf = data.clone();
        apply_mask(&mut buf, mask);
        apply_mask(&mut buf, mask);
        prop_assert_eq!(buf, data);
    }

    #[test]
    fn test_mask_split_matches_whole(
        data in prop::collection::vec(any::<u8>(), 1..300),
        mask in any::<[u8; 4]>(),
        split in any::<prop::sample::Index>()
    ) {
        let at = split.index(data.len());
        let mut whole = data.clone();
        apply_mask(&mut whole, mask);

        let mut parts = data.clone();
        let (head, tail) = parts.split_at_mut(at);
        apply_mask_at(head, mask, 0);
        apply_mask_at(tail, mask, at);
        prop_assert_eq!(parts, whole);
    }

    #[test]
    fn test_header_length_matches_encoding(len in 0usize..200_000) {
        let header = FrameHeader::new(true, OpCode::Binary, len, None);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        prop_assert_eq!(buf.len(), header.encoded_len());

        let (parsed, used) = FrameHeader::parse(&buf).unwrap();
        prop_assert_eq!(used, buf.len());
        prop_assert_eq!(parsed.payload_len, len);
    }

    #[test]
    fn test_control_frames_over_limit_fail_validation(
        opcode in control_opcode_strategy(),
        len in 126usize..1000
    ) {
        let header = FrameHeader::new(true, opcode, len, None);
        prop_assert!(header.validate().is_err());
    }

    #[test]
    fn test_truncated_frame_is_incomplete(
        payload in prop::collection::vec(any::<u8>(), 1..500),
        cut in any::<prop::sample::Index>()
    ) {
        let wire = encode(true, OpCode::Binary, &payload, None);
        let at = cut.index(wire.len());
        prop_assert!(Frame::parse(&wire[..at]).is_err());
    }

    #[test]
    fn test_frame_parse_no_panic(data in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = Frame::parse(&data);
    }

    // =========================================================================
    // CSAP records
    // =========================================================================
    #[test]
    fn test_control_frame_survives_encoding(
        user_ctl_size in any::<u32>(),
        data_size in any::<u32>(),
        num_fragments in 0usize..10_000,
        max_fragment_size in any::<u32>(),
        binary in any::<bool>(),
        fin in any::<bool>()
    ) {
        let control = ControlFrame {
            user_ctl_size: user_ctl_size as usize,
            data_size: data_size as usize,
            num_fragments,
            max_fragment_size: max_fragment_size as usize,
            format: if binary { Format::Binary } else { Format::Text },
            fin,
        };
        let wire = control.encode();
        prop_assert!(wire.iter().all(u8::is_ascii_digit));
        prop_assert_eq!(ControlFrame::decode(&wire).unwrap(), control);
    }

    #[test]
    fn test_control_frame_decode_no_panic(data in prop::collection::vec(any::<u8>(), 0..100)) {
        let _ = ControlFrame::decode(&data);
    }

    #[test]
    fn test_open_request_decode_no_panic(data in prop::collection::vec(any::<u8>(), 0..200)) {
        let _ = OpenRequest::decode(&data);
    }

    #[test]
    fn test_fixed_request_keeps_service(service in "[A-Z][A-Z0-9/_-]{0,40}") {
        let wire = OpenRequest::new(service.clone()).encode(WireFormat::Fixed).unwrap();
        let (request, format) = OpenRequest::decode(&wire).unwrap();
        prop_assert_eq!(format, WireFormat::Fixed);
        prop_assert_eq!(request.service(), Some(service.as_str()));
    }

    #[test]
    fn test_reply_decode_no_panic(data in prop::collection::vec(any::<u8>(), 0..100)) {
        let _ = HandshakeReply::decode(&data, WireFormat::Fixed);
        let _ = HandshakeReply::decode(&data, WireFormat::Json);
    }

    #[test]
    fn test_http_head_parse_no_panic(data in prop::collection::vec(any::<u8>(), 0..2000)) {
        let _ = HttpRequestHead::parse(&data);
    }
}

#[test]
fn test_length_class_boundaries() {
    for (len, header_len) in [(0, 2), (125, 2), (126, 4), (65535, 4), (65536, 10)] {
        let payload = vec![0xA5u8; len];
        let wire = encode(true, OpCode::Binary, &payload, None);
        assert_eq!(wire.len(), header_len + len, "length {len}");
        let (frame, _) = Frame::parse(&wire).unwrap();
        assert_eq!(frame.payload.len(), len);
    }
}
