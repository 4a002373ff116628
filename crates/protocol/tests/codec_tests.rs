use proptest::prelude::*;
use protocol::{
    CapLevel, CoReq, HEADER_LEN, Method, MessageType, SendReqPayload, VerifyReqBody,
    decode_header, decode_send_req, decode_verify_req, encode_send_req, encode_verify_req,
};

fn arb_device_id() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9-]{30,40}"
}

proptest! {
    #[test]
    fn verify_req_round_trips_for_any_valid_device_id(device_id in arb_device_id(), secret in "[a-zA-Z0-9]{1,32}") {
        let body = VerifyReqBody { cap_level: CapLevel::L1, device_id, secret };
        let frame = encode_verify_req(1, &body).unwrap();
        let header = decode_header(&frame).unwrap();
        let decoded = decode_verify_req(&frame[HEADER_LEN..HEADER_LEN + header.body_len as usize]).unwrap();
        prop_assert_eq!(decoded, body);
    }

    #[test]
    fn co_req_round_trips_for_any_data(data in proptest::collection::vec(any::<u8>(), 0..200), uri_hash in any::<u32>()) {
        let payload = SendReqPayload::Co(CoReq { method: Method::ConstrainedPost, uri_hash, data });
        let frame = encode_send_req(MessageType::ServerSendReq, 1, &payload).unwrap();
        let header = decode_header(&frame).unwrap();
        let decoded = decode_send_req(MessageType::ServerSendReq, &frame[HEADER_LEN..HEADER_LEN + header.body_len as usize]).unwrap();
        prop_assert_eq!(decoded, payload);
    }

    #[test]
    fn mutating_the_header_byte_never_panics(byte0 in any::<u8>(), byte1 in any::<u8>()) {
        let buf = [byte0, byte1, 0, 0, 0];
        let _ = decode_header(&buf);
    }
}
