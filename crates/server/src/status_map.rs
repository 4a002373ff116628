//! Cross-layer status code mapping
//!
//! The front-adapter contracts (CoPost, ObGet) return a `FacadeStatus` rather
//! than `protocol::StatusCode` directly: the facade needs a few codes that
//! only make sense above the wire (no session exists, a local timer fired)
//! and that don't correspond to anything a device ever sends. The mapping
//! between the two is total and, on the wire-derived half, bijective.

use protocol::StatusCode;

/// Status surfaced to front callers (CoPost/ObGet), a superset of the wire's
/// `StatusCode` plus facade-only conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FacadeStatus {
    Ok,
    Continue,
    Terminate,
    NotFound,
    BadRequest,
    MethodNotAllowed,
    TooManyRequests,
    TooManyObservers,
    InternalServerError,
    /// No session exists for the requested deviceID.
    DeviceOffline,
    /// The session exists but the device did not answer in time.
    DeviceTimeout,
    /// The request never reached the device; a local deadline fired first.
    RequestTimeout,
}

/// Maps a device-level status code onto its facade counterpart.
pub fn from_device_status(status: StatusCode) -> FacadeStatus {
    match status {
        StatusCode::Unknown => FacadeStatus::InternalServerError,
        StatusCode::Ok => FacadeStatus::Ok,
        StatusCode::Continue => FacadeStatus::Continue,
        StatusCode::Terminate => FacadeStatus::Terminate,
        StatusCode::NotFound => FacadeStatus::NotFound,
        StatusCode::BadRequest => FacadeStatus::BadRequest,
        StatusCode::MethodNotAllowed => FacadeStatus::MethodNotAllowed,
        StatusCode::TooManyRequests => FacadeStatus::TooManyRequests,
        StatusCode::TooManyObservers => FacadeStatus::TooManyObservers,
        StatusCode::InternalServerError => FacadeStatus::InternalServerError,
    }
}

/// The inverse mapping, used when a façade-originated status must be
/// re-encoded as a device-level code (e.g. forwarding a local rejection).
/// Façade-only variants have no wire representation and collapse to
/// `InternalServerError`.
pub fn to_device_status(status: FacadeStatus) -> StatusCode {
    match status {
        FacadeStatus::Ok => StatusCode::Ok,
        FacadeStatus::Continue => StatusCode::Continue,
        FacadeStatus::Terminate => StatusCode::Terminate,
        FacadeStatus::NotFound => StatusCode::NotFound,
        FacadeStatus::BadRequest => StatusCode::BadRequest,
        FacadeStatus::MethodNotAllowed => StatusCode::MethodNotAllowed,
        FacadeStatus::TooManyRequests => StatusCode::TooManyRequests,
        FacadeStatus::TooManyObservers => StatusCode::TooManyObservers,
        FacadeStatus::InternalServerError
        | FacadeStatus::DeviceOffline
        | FacadeStatus::DeviceTimeout
        | FacadeStatus::RequestTimeout => StatusCode::InternalServerError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIRE_CODES: &[StatusCode] = &[
        StatusCode::Unknown,
        StatusCode::Ok,
        StatusCode::Continue,
        StatusCode::Terminate,
        StatusCode::NotFound,
        StatusCode::BadRequest,
        StatusCode::MethodNotAllowed,
        StatusCode::TooManyRequests,
        StatusCode::TooManyObservers,
        StatusCode::InternalServerError,
    ];

    #[test]
    fn wire_derived_half_round_trips_except_unknown() {
        for &code in WIRE_CODES {
            if code == StatusCode::Unknown {
                continue;
            }
            let facade = from_device_status(code);
            assert_eq!(to_device_status(facade), code);
        }
    }

    #[test]
    fn facade_only_codes_collapse_to_internal_server_error() {
        assert_eq!(
            to_device_status(FacadeStatus::DeviceOffline),
            StatusCode::InternalServerError
        );
        assert_eq!(
            to_device_status(FacadeStatus::DeviceTimeout),
            StatusCode::InternalServerError
        );
        assert_eq!(
            to_device_status(FacadeStatus::RequestTimeout),
            StatusCode::InternalServerError
        );
    }
}
