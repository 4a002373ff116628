//! Wire protocol for the device access hub
//!
//! This crate defines the binary framing and message shapes spoken between a
//! constrained device and the hub over a single persistent connection: a
//! fixed 5-byte header (version nibble, message type nibble, correlation id,
//! body length) followed by a per-type body. It provides pure encode/decode
//! functions only; it never touches a socket.
//!
//! # Example
//!
//! ```
//! use protocol::{encode_verify_req, decode_verify_req, decode_header, HEADER_LEN};
//! use protocol::{VerifyReqBody, CapLevel};
//!
//! let body = VerifyReqBody {
//!     cap_level: CapLevel::L1,
//!     device_id: "cfa09baa-4913-4ad7-a936-2e26f9".to_string(),
//!     secret: "s3cr3t".to_string(),
//! };
//! let frame = encode_verify_req(1, &body).unwrap();
//! let header = decode_header(&frame).unwrap();
//! let decoded = decode_verify_req(&frame[HEADER_LEN..HEADER_LEN + header.body_len as usize]).unwrap();
//! assert_eq!(decoded, body);
//! ```

pub mod codec;
pub mod error;
pub mod integrity;
pub mod messages;
pub mod version;

pub use codec::{
    DEVICE_ID_BUSINESS_RANGE, DEVICE_ID_CODEC_RANGE, DEVICE_SECRET_CODEC_RANGE, HEADER_LEN,
    Header, MAX_BODY_LEN, decode_header, decode_ping_req, decode_ping_resp, decode_send_req,
    decode_send_resp, decode_verify_req, decode_verify_resp, encode_ping_req, encode_ping_resp,
    encode_send_req, encode_send_resp, encode_verify_req, encode_verify_resp,
};
pub use error::{ProtocolError, Result};
pub use integrity::{crc32_ieee, hex_digest, uri_hash};
pub use messages::{
    CapLevel, CoReq, CoResp, Method, MessageType, ObGetEstabReq, ObGetEstabResp, ObGetNotifyReq,
    ObGetNotifyResp, PingReqBody, PingRespBody, RemoteCode, SendReqPayload, SendRespPayload,
    StatusCode, VerifyReqBody, VerifyRespBody,
};
pub use version::{PROTOCOL_VERSION, is_supported};
