//! Wire codec: fixed 5-byte headers plus per-message bodies
//!
//! All multi-byte integers are big-endian. A header packs the message type
//! into the high nibble and the protocol version into the low nibble of its
//! first byte, followed by a 16-bit correlation id and a 16-bit body length.
//! Encoders build a full frame (header + body); decoders operate on a body
//! slice handed to them once the caller has already read exactly
//! `header.body_len` bytes from the stream.

use crate::error::{ProtocolError, Result};
use crate::messages::{
    CapLevel, CoReq, CoResp, Method, MessageType, ObGetEstabReq, ObGetEstabResp, ObGetNotifyReq,
    ObGetNotifyResp, PingReqBody, PingRespBody, RemoteCode, SendReqPayload, SendRespPayload,
    StatusCode, VerifyReqBody, VerifyRespBody,
};
use crate::version::PROTOCOL_VERSION;

/// Length of the fixed header in bytes.
pub const HEADER_LEN: usize = 5;

/// Largest body a frame can carry (16-bit length field).
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

/// deviceID length bound enforced by the codec itself (matches the range the
/// original implementation rejects at parse time).
pub const DEVICE_ID_CODEC_RANGE: std::ops::RangeInclusive<usize> = 1..=63;
/// Secret length bound enforced by the codec itself.
pub const DEVICE_SECRET_CODEC_RANGE: std::ops::RangeInclusive<usize> = 1..=64;

/// Business-level deviceID length bound, enforced above the codec by the
/// verify handler (see the session state machine).
pub const DEVICE_ID_BUSINESS_RANGE: std::ops::RangeInclusive<usize> = 30..=40;

/// A decoded header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: MessageType,
    pub id: u16,
    pub body_len: u16,
}

fn encode_header(out: &mut Vec<u8>, msg_type: MessageType, id: u16, body_len: usize) -> Result<()> {
    if body_len > MAX_BODY_LEN {
        return Err(ProtocolError::BodyTooLarge {
            size: body_len,
            max: MAX_BODY_LEN,
        });
    }
    out.push((msg_type.nibble() << 4) | PROTOCOL_VERSION);
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&(body_len as u16).to_be_bytes());
    Ok(())
}

/// Decode the fixed 5-byte header from the start of a buffer.
pub fn decode_header(buf: &[u8]) -> Result<Header> {
    if buf.len() < HEADER_LEN {
        return Err(ProtocolError::IncompleteFrame {
            expected: HEADER_LEN,
            actual: buf.len(),
        });
    }
    let version = buf[0] & 0x0f;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion {
            found: version,
            expected: PROTOCOL_VERSION,
        });
    }
    let type_nibble = buf[0] >> 4;
    let msg_type =
        MessageType::from_nibble(type_nibble).ok_or(ProtocolError::UnknownMessageType(type_nibble))?;
    let id = u16::from_be_bytes([buf[1], buf[2]]);
    let body_len = u16::from_be_bytes([buf[3], buf[4]]);
    Ok(Header {
        msg_type,
        id,
        body_len,
    })
}

fn check_len(field: &'static str, actual: usize, range: std::ops::RangeInclusive<usize>) -> Result<()> {
    if range.contains(&actual) {
        Ok(())
    } else {
        Err(ProtocolError::FieldOutOfBounds {
            field,
            actual,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

// ---- DeviceVerifyReq / DeviceVerifyResp ----

pub fn encode_verify_req(id: u16, body: &VerifyReqBody) -> Result<Vec<u8>> {
    check_len("device_id", body.device_id.len(), DEVICE_ID_CODEC_RANGE)?;
    check_len("secret", body.secret.len(), DEVICE_SECRET_CODEC_RANGE)?;
    let mut payload = Vec::with_capacity(1 + body.device_id.len() + 1 + body.secret.len());
    payload.push(body.cap_level as u8);
    payload.extend_from_slice(body.device_id.as_bytes());
    payload.push(b':');
    payload.extend_from_slice(body.secret.as_bytes());
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    encode_header(&mut out, MessageType::DeviceVerifyReq, id, payload.len())?;
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn decode_verify_req(body: &[u8]) -> Result<VerifyReqBody> {
    if body.is_empty() {
        return Err(ProtocolError::IncompleteFrame {
            expected: 1,
            actual: 0,
        });
    }
    let cap_level = CapLevel::from_u8(body[0]).ok_or(ProtocolError::FieldOutOfBounds {
        field: "cap_level",
        actual: body[0] as usize,
        min: 0,
        max: 3,
    })?;
    let rest = &body[1..];
    let sep = rest
        .iter()
        .position(|&b| b == b':')
        .ok_or(ProtocolError::IncompleteFrame {
            expected: 1,
            actual: 0,
        })?;
    let device_id = String::from_utf8_lossy(&rest[..sep]).into_owned();
    let secret = String::from_utf8_lossy(&rest[sep + 1..]).into_owned();
    check_len("device_id", device_id.len(), DEVICE_ID_CODEC_RANGE)?;
    check_len("secret", secret.len(), DEVICE_SECRET_CODEC_RANGE)?;
    Ok(VerifyReqBody {
        cap_level,
        device_id,
        secret,
    })
}

pub fn encode_verify_resp(id: u16, body: VerifyRespBody) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_LEN + 1);
    encode_header(&mut out, MessageType::DeviceVerifyResp, id, 1)?;
    out.push(body.code.as_u8());
    Ok(out)
}

pub fn decode_verify_resp(body: &[u8]) -> Result<VerifyRespBody> {
    if body.len() != 1 {
        return Err(ProtocolError::IncompleteFrame {
            expected: 1,
            actual: body.len(),
        });
    }
    Ok(VerifyRespBody {
        code: RemoteCode::from_u8(body[0]),
    })
}

// ---- DevicePingReq / DevicePingResp ----

pub fn encode_ping_req(id: u16, body: PingReqBody) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_LEN + 4);
    encode_header(&mut out, MessageType::DevicePingReq, id, 4)?;
    out.extend_from_slice(&body.heartbeat_secs.to_be_bytes());
    Ok(out)
}

pub fn decode_ping_req(body: &[u8]) -> Result<PingReqBody> {
    if body.len() != 4 {
        return Err(ProtocolError::IncompleteFrame {
            expected: 4,
            actual: body.len(),
        });
    }
    Ok(PingReqBody {
        heartbeat_secs: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
    })
}

pub fn encode_ping_resp(id: u16, body: PingRespBody) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_LEN + 1);
    encode_header(&mut out, MessageType::DevicePingResp, id, 1)?;
    out.push(body.code.as_u8());
    Ok(out)
}

pub fn decode_ping_resp(body: &[u8]) -> Result<PingRespBody> {
    if body.len() != 1 {
        return Err(ProtocolError::IncompleteFrame {
            expected: 1,
            actual: body.len(),
        });
    }
    Ok(PingRespBody {
        code: RemoteCode::from_u8(body[0]),
    })
}

// ---- ServerSendReq / DeviceSendReq ----

fn send_req_body(payload: &SendReqPayload) -> Vec<u8> {
    match payload {
        SendReqPayload::Co(req) => {
            let mut out = Vec::with_capacity(5 + req.data.len());
            out.push(req.method as u8);
            out.extend_from_slice(&req.uri_hash.to_be_bytes());
            out.extend_from_slice(&req.data);
            out
        }
        SendReqPayload::ObGetEstab(req) => {
            let mut out = Vec::with_capacity(7 + req.data.len());
            out.push(Method::ObservedGet as u8);
            out.extend_from_slice(&req.observer_id.to_be_bytes());
            out.extend_from_slice(&req.uri_hash.to_be_bytes());
            out.extend_from_slice(&req.data);
            out
        }
        SendReqPayload::ObGetNotify(req) => {
            let mut out = Vec::with_capacity(4 + req.data.len());
            out.push(Method::ObservedGet as u8);
            out.extend_from_slice(&req.observer_id.to_be_bytes());
            out.push(req.status.as_u8());
            out.extend_from_slice(&req.data);
            out
        }
    }
}

/// Encode a `ServerSendReq` or `DeviceSendReq` frame carrying the given payload.
pub fn encode_send_req(msg_type: MessageType, id: u16, payload: &SendReqPayload) -> Result<Vec<u8>> {
    debug_assert!(matches!(
        msg_type,
        MessageType::ServerSendReq | MessageType::DeviceSendReq
    ));
    let body = send_req_body(payload);
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    encode_header(&mut out, msg_type, id, body.len())?;
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a `ServerSendReq` / `DeviceSendReq` body. `msg_type` disambiguates
/// establish (server-originated) from notify (device-originated) for the
/// `ObservedGet` method, since both share the same method tag.
pub fn decode_send_req(msg_type: MessageType, body: &[u8]) -> Result<SendReqPayload> {
    if body.is_empty() {
        return Err(ProtocolError::IncompleteFrame {
            expected: 1,
            actual: 0,
        });
    }
    let method = Method::from_u8(body[0]).ok_or(ProtocolError::UnknownMethod(body[0]))?;
    match (msg_type, method) {
        (_, Method::ConstrainedGet) | (_, Method::ConstrainedPost) => {
            if body.len() < 5 {
                return Err(ProtocolError::IncompleteFrame {
                    expected: 5,
                    actual: body.len(),
                });
            }
            let uri_hash = u32::from_be_bytes([body[1], body[2], body[3], body[4]]);
            Ok(SendReqPayload::Co(CoReq {
                method,
                uri_hash,
                data: body[5..].to_vec(),
            }))
        }
        (MessageType::ServerSendReq, Method::ObservedGet) => {
            if body.len() < 7 {
                return Err(ProtocolError::IncompleteFrame {
                    expected: 7,
                    actual: body.len(),
                });
            }
            let observer_id = u16::from_be_bytes([body[1], body[2]]);
            let uri_hash = u32::from_be_bytes([body[3], body[4], body[5], body[6]]);
            Ok(SendReqPayload::ObGetEstab(ObGetEstabReq {
                observer_id,
                uri_hash,
                data: body[7..].to_vec(),
            }))
        }
        (MessageType::DeviceSendReq, Method::ObservedGet) => {
            if body.len() < 4 {
                return Err(ProtocolError::IncompleteFrame {
                    expected: 4,
                    actual: body.len(),
                });
            }
            let observer_id = u16::from_be_bytes([body[1], body[2]]);
            let status = StatusCode::from_u8(body[3]);
            Ok(SendReqPayload::ObGetNotify(ObGetNotifyReq {
                observer_id,
                status,
                data: body[4..].to_vec(),
            }))
        }
        _ => Err(ProtocolError::UnknownMethod(body[0])),
    }
}

fn send_resp_body(payload: &SendRespPayload) -> Vec<u8> {
    match payload {
        SendRespPayload::Co(resp) => {
            let mut out = Vec::with_capacity(1 + resp.data.len());
            out.push(resp.status.as_u8());
            out.extend_from_slice(&resp.data);
            out
        }
        SendRespPayload::ObGetEstab(resp) => vec![resp.status.as_u8()],
        SendRespPayload::ObGetNotify(resp) => vec![resp.status.as_u8()],
    }
}

/// Encode a `ServerSendResp` / `DeviceSendResp` frame.
pub fn encode_send_resp(
    msg_type: MessageType,
    id: u16,
    payload: &SendRespPayload,
) -> Result<Vec<u8>> {
    debug_assert!(matches!(
        msg_type,
        MessageType::ServerSendResp | MessageType::DeviceSendResp
    ));
    let body = send_resp_body(payload);
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    encode_header(&mut out, msg_type, id, body.len())?;
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a `ServerSendResp` / `DeviceSendResp` body. Unlike the request side,
/// responses carry no method byte; the caller supplies the method of the
/// original request they are matching this response against.
pub fn decode_send_resp(
    msg_type: MessageType,
    method: Method,
    body: &[u8],
) -> Result<SendRespPayload> {
    match (msg_type, method) {
        (_, Method::ConstrainedGet) | (_, Method::ConstrainedPost) => {
            if body.is_empty() {
                return Err(ProtocolError::IncompleteFrame {
                    expected: 1,
                    actual: 0,
                });
            }
            Ok(SendRespPayload::Co(CoResp {
                status: StatusCode::from_u8(body[0]),
                data: body[1..].to_vec(),
            }))
        }
        (MessageType::ServerSendResp, Method::ObservedGet) => {
            if body.len() != 1 {
                return Err(ProtocolError::IncompleteFrame {
                    expected: 1,
                    actual: body.len(),
                });
            }
            Ok(SendRespPayload::ObGetEstab(ObGetEstabResp {
                status: StatusCode::from_u8(body[0]),
            }))
        }
        (MessageType::DeviceSendResp, Method::ObservedGet) => {
            if body.len() != 1 {
                return Err(ProtocolError::IncompleteFrame {
                    expected: 1,
                    actual: body.len(),
                });
            }
            Ok(SendRespPayload::ObGetNotify(ObGetNotifyResp {
                status: StatusCode::from_u8(body[0]),
            }))
        }
        _ => Err(ProtocolError::UnknownMethod(method as u8)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let frame = encode_verify_req(
            0x8899,
            &VerifyReqBody {
                cap_level: CapLevel::L0,
                device_id: "d".repeat(30),
                secret: "s".to_string(),
            },
        )
        .unwrap();
        let header = decode_header(&frame).unwrap();
        assert_eq!(header.msg_type, MessageType::DeviceVerifyReq);
        assert_eq!(header.id, 0x8899);
        assert_eq!(header.body_len as usize, frame.len() - HEADER_LEN);
        assert_eq!(frame[0] & 0x0f, PROTOCOL_VERSION);
        assert_eq!(frame[0] >> 4, MessageType::DeviceVerifyReq.nibble());
    }

    #[test]
    fn verify_req_round_trip() {
        let body = VerifyReqBody {
            cap_level: CapLevel::L2,
            device_id: "cfa09baa-4913-4ad7-a936-2e26f9".to_string(),
            secret: "topsecret".to_string(),
        };
        let frame = encode_verify_req(7, &body).unwrap();
        let header = decode_header(&frame).unwrap();
        let decoded = decode_verify_req(&frame[HEADER_LEN..HEADER_LEN + header.body_len as usize])
            .unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn verify_req_rejects_short_device_id() {
        let body = VerifyReqBody {
            cap_level: CapLevel::L0,
            device_id: "short".to_string(),
            secret: "s".to_string(),
        };
        let frame = encode_verify_req(1, &body).unwrap();
        let header = decode_header(&frame).unwrap();
        // codec-level bound [1,63] accepts "short"; business bound [30,40] is
        // enforced separately by the session verify handler.
        assert!(
            decode_verify_req(&frame[HEADER_LEN..HEADER_LEN + header.body_len as usize]).is_ok()
        );
        assert!(!DEVICE_ID_BUSINESS_RANGE.contains(&body.device_id.len()));
    }

    #[test]
    fn verify_req_rejects_empty_secret() {
        let err = encode_verify_req(
            1,
            &VerifyReqBody {
                cap_level: CapLevel::L0,
                device_id: "d".repeat(30),
                secret: String::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::FieldOutOfBounds { field: "secret", .. }));
    }

    #[test]
    fn co_req_round_trip_via_server_send() {
        let payload = SendReqPayload::Co(CoReq {
            method: Method::ConstrainedPost,
            uri_hash: 0xdead_beef,
            data: b"ping".to_vec(),
        });
        let frame = encode_send_req(MessageType::ServerSendReq, 42, &payload).unwrap();
        let header = decode_header(&frame).unwrap();
        assert_eq!(header.msg_type, MessageType::ServerSendReq);
        let decoded = decode_send_req(
            MessageType::ServerSendReq,
            &frame[HEADER_LEN..HEADER_LEN + header.body_len as usize],
        )
        .unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn obget_estab_round_trip() {
        let payload = SendReqPayload::ObGetEstab(ObGetEstabReq {
            observer_id: 7,
            uri_hash: 1234,
            data: vec![],
        });
        let frame = encode_send_req(MessageType::ServerSendReq, 1, &payload).unwrap();
        let header = decode_header(&frame).unwrap();
        let decoded = decode_send_req(
            MessageType::ServerSendReq,
            &frame[HEADER_LEN..HEADER_LEN + header.body_len as usize],
        )
        .unwrap();
        assert_eq!(decoded, payload);

        let resp_payload = SendRespPayload::ObGetEstab(ObGetEstabResp {
            status: StatusCode::Continue,
        });
        let resp_frame = encode_send_resp(MessageType::ServerSendResp, 1, &resp_payload).unwrap();
        let resp_header = decode_header(&resp_frame).unwrap();
        let resp_decoded = decode_send_resp(
            MessageType::ServerSendResp,
            Method::ObservedGet,
            &resp_frame[HEADER_LEN..HEADER_LEN + resp_header.body_len as usize],
        )
        .unwrap();
        assert_eq!(resp_decoded, resp_payload);
    }

    #[test]
    fn obget_notify_round_trip() {
        let payload = SendReqPayload::ObGetNotify(ObGetNotifyReq {
            observer_id: 9,
            status: StatusCode::Continue,
            data: b"1".to_vec(),
        });
        let frame = encode_send_req(MessageType::DeviceSendReq, 3, &payload).unwrap();
        let header = decode_header(&frame).unwrap();
        let decoded = decode_send_req(
            MessageType::DeviceSendReq,
            &frame[HEADER_LEN..HEADER_LEN + header.body_len as usize],
        )
        .unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn decode_header_rejects_short_buffer() {
        let err = decode_header(&[0u8; 3]).unwrap_err();
        assert!(matches!(err, ProtocolError::IncompleteFrame { .. }));
    }

    #[test]
    fn decode_header_rejects_bad_version() {
        let mut frame = vec![0u8; HEADER_LEN];
        frame[0] = (MessageType::DevicePingReq.nibble() << 4) | 0x0f;
        let err = decode_header(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion { .. }));
    }
}
