//! Wire message types
//!
//! The protocol is a closed set of four message types, each carrying a small
//! fixed-shape body. `ServerSendReq`/`ServerSendResp` and `DeviceSendReq`/
//! `DeviceSendResp` additionally multiplex on a leading method byte into one
//! of three sub-message shapes (constrained request/response, observation
//! establish, observation notify).

use serde::{Deserialize, Serialize};

/// Message type, packed into the high nibble of the header's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    DeviceVerifyReq = 1,
    DeviceVerifyResp = 2,
    DevicePingReq = 3,
    DevicePingResp = 4,
    DeviceSendReq = 5,
    DeviceSendResp = 6,
    ServerSendReq = 7,
    ServerSendResp = 8,
}

impl MessageType {
    pub fn from_nibble(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::DeviceVerifyReq,
            2 => Self::DeviceVerifyResp,
            3 => Self::DevicePingReq,
            4 => Self::DevicePingResp,
            5 => Self::DeviceSendReq,
            6 => Self::DeviceSendResp,
            7 => Self::ServerSendReq,
            8 => Self::ServerSendResp,
            _ => return None,
        })
    }

    pub fn nibble(self) -> u8 {
        self as u8
    }
}

/// Method tag carried as the first body octet of a Send request/response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Method {
    ConstrainedGet = 1,
    ConstrainedPost = 2,
    ObservedGet = 3,
}

impl Method {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::ConstrainedGet,
            2 => Self::ConstrainedPost,
            3 => Self::ObservedGet,
            _ => return None,
        })
    }
}

/// Device-level status code, carried in responses and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusCode {
    Unknown = 0,
    Ok = 1,
    Continue = 2,
    Terminate = 3,
    NotFound = 4,
    BadRequest = 5,
    MethodNotAllowed = 6,
    TooManyRequests = 7,
    TooManyObservers = 8,
    InternalServerError = 9,
}

impl StatusCode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Ok,
            2 => Self::Continue,
            3 => Self::Terminate,
            4 => Self::NotFound,
            5 => Self::BadRequest,
            6 => Self::MethodNotAllowed,
            7 => Self::TooManyRequests,
            8 => Self::TooManyObservers,
            9 => Self::InternalServerError,
            _ => Self::Unknown,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether an observation notification carrying this code keeps the
    /// observation alive (`Continue`) or ends it (anything else).
    pub fn continues_observation(self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// Remote code returned from a verify or ping response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RemoteCode {
    Success = 0,
    ParaInvalid = 1,
    VerifyFail = 2,
    LengthErr = 3,
    UnknownErr = 4,
}

impl RemoteCode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Success,
            1 => Self::ParaInvalid,
            2 => Self::VerifyFail,
            3 => Self::LengthErr,
            _ => Self::UnknownErr,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Capability level advertised at verify time; selects the body capacity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CapLevel {
    L0 = 0,
    L1 = 1,
    L2 = 2,
    L3 = 3,
}

impl CapLevel {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::L0,
            1 => Self::L1,
            2 => Self::L2,
            3 => Self::L3,
            _ => return None,
        })
    }

    /// Maximum body octets a device at this level is willing to receive.
    pub fn body_cap_size(self) -> usize {
        match self {
            Self::L0 => 256,
            Self::L1 => 1024,
            Self::L2 => 4096,
            Self::L3 => 16384,
        }
    }
}

/// `DeviceVerifyReq` body: cap level followed by `deviceID:secret`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReqBody {
    pub cap_level: CapLevel,
    pub device_id: String,
    pub secret: String,
}

/// `DeviceVerifyResp` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyRespBody {
    pub code: RemoteCode,
}

/// `DevicePingReq` body: proposed heartbeat interval in seconds, 0 meaning
/// "keep the current interval".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingReqBody {
    pub heartbeat_secs: u32,
}

/// `DevicePingResp` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingRespBody {
    pub code: RemoteCode,
}

/// Constrained request sub-message (Get or Post).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoReq {
    pub method: Method,
    pub uri_hash: u32,
    pub data: Vec<u8>,
}

/// Constrained response sub-message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoResp {
    pub status: StatusCode,
    pub data: Vec<u8>,
}

/// Observation establish request sub-message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObGetEstabReq {
    pub observer_id: u16,
    pub uri_hash: u32,
    pub data: Vec<u8>,
}

/// Observation establish response sub-message. Carries no data, only the
/// device's initial status for the observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObGetEstabResp {
    pub status: StatusCode,
}

/// Observation notify request sub-message (device -> server push).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObGetNotifyReq {
    pub observer_id: u16,
    pub status: StatusCode,
    pub data: Vec<u8>,
}

/// Observation notify response sub-message: a bare status ack (`Continue` to
/// keep pushing, `Terminate` if the observer id is no longer known).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObGetNotifyResp {
    pub status: StatusCode,
}

/// The decoded payload of a `ServerSendReq` / `DeviceSendReq` body, tagged by
/// the leading method byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendReqPayload {
    Co(CoReq),
    ObGetEstab(ObGetEstabReq),
    ObGetNotify(ObGetNotifyReq),
}

impl SendReqPayload {
    pub fn method(&self) -> Method {
        match self {
            Self::Co(req) => req.method,
            Self::ObGetEstab(_) => Method::ObservedGet,
            Self::ObGetNotify(_) => Method::ObservedGet,
        }
    }
}

/// The decoded payload of a `ServerSendResp` / `DeviceSendResp` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendRespPayload {
    Co(CoResp),
    ObGetEstab(ObGetEstabResp),
    ObGetNotify(ObGetNotifyResp),
}
