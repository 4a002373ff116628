//! Front-adapter contracts (C7)
//!
//! The inbound API an HTTP/RPC front end calls to drive a device through its
//! session: a one-shot constrained POST, an observation establish-plus-stream,
//! and a read-only session lookup. Every call here goes through the session
//! registry first to find the session for a deviceID; nothing here touches a
//! socket directly.

use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::status_map::{FacadeStatus, from_device_status};
use protocol::{CoReq, Method, ObGetEstabReq, SendReqPayload, SendRespPayload};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bytes reserved in a CoResp frame ahead of its data payload (status byte).
const CO_RESP_INSET: usize = 1;

/// Outcome of [`DeviceQuery`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub body_cap_size: usize,
    pub remote_addr: String,
}

/// A single item yielded by an established observation stream.
#[derive(Debug, Clone)]
pub struct ObservationFrame {
    pub frame_id: u64,
    pub status: FacadeStatus,
    pub data: Vec<u8>,
}

/// Looks a session up by deviceID, read-only, no wire traffic.
pub async fn device_query(registry: &SessionRegistry, device_id: &str) -> Option<DeviceInfo> {
    let session = registry.get(device_id).await?;
    Some(DeviceInfo {
        body_cap_size: session.body_cap_size(),
        remote_addr: session.remote_addr.clone(),
    })
}

/// Sends a constrained POST to `device_id` and waits for its response.
pub async fn co_post(
    registry: &SessionRegistry,
    device_id: &str,
    uri_hash: u32,
    data: Vec<u8>,
    timeout: Duration,
) -> (FacadeStatus, Vec<u8>) {
    let Some(session) = registry.get(device_id).await else {
        return (FacadeStatus::DeviceOffline, Vec::new());
    };

    if data.len() > session.body_cap_size().saturating_sub(CO_RESP_INSET) {
        return (FacadeStatus::BadRequest, Vec::new());
    }

    let id = session.next_header_id();
    let rx = session.pending().set(id, Method::ConstrainedPost);

    let payload = SendReqPayload::Co(CoReq {
        method: Method::ConstrainedPost,
        uri_hash,
        data,
    });
    let Ok(frame) = protocol::encode_send_req(protocol::MessageType::ServerSendReq, id, &payload)
    else {
        session.pending().del(id);
        return (FacadeStatus::InternalServerError, Vec::new());
    };
    session.enqueue(frame).await;

    match tokio::time::timeout(timeout, rx).await {
        Err(_) => {
            session.pending().del(id);
            (FacadeStatus::RequestTimeout, Vec::new())
        }
        Ok(Err(_)) => (FacadeStatus::RequestTimeout, Vec::new()),
        Ok(Ok(body)) => {
            match protocol::decode_send_resp(
                protocol::MessageType::ServerSendResp,
                Method::ConstrainedPost,
                &body,
            ) {
                Ok(SendRespPayload::Co(resp)) => (from_device_status(resp.status), resp.data),
                _ => (FacadeStatus::InternalServerError, Vec::new()),
            }
        }
    }
}

/// Establishes an observation on `device_id` for `uri_hash`. On success,
/// returns a stream of [`ObservationFrame`]s; the stream ends when the
/// session goes offline, the observation is terminated by the device, or
/// `cancel` fires. Any non-`Continue` establish status is returned directly
/// with no stream.
pub async fn ob_get_establish(
    registry: &SessionRegistry,
    device_id: &str,
    uri_hash: u32,
    data: Vec<u8>,
    establish_timeout: Duration,
    cancel: CancellationToken,
) -> Result<tokio::sync::mpsc::Receiver<ObservationFrame>, FacadeStatus> {
    let Some(session) = registry.get(device_id).await else {
        return Err(FacadeStatus::DeviceOffline);
    };

    let observer_id = session.next_observer_id();
    let mut observation = session
        .observations()
        .create(observer_id)
        .map_err(|_| FacadeStatus::TooManyObservers)?;

    let id = session.next_header_id();
    let rx = session.pending().set(id, Method::ObservedGet);

    let payload = SendReqPayload::ObGetEstab(ObGetEstabReq {
        observer_id,
        uri_hash,
        data,
    });
    let Ok(frame) = protocol::encode_send_req(protocol::MessageType::ServerSendReq, id, &payload)
    else {
        session.pending().del(id);
        session.observations().destroy(observer_id);
        return Err(FacadeStatus::InternalServerError);
    };
    session.enqueue(frame).await;

    let establish_status = match tokio::time::timeout(establish_timeout, rx).await {
        Err(_) => {
            session.pending().del(id);
            session.observations().destroy(observer_id);
            return Err(FacadeStatus::RequestTimeout);
        }
        Ok(Err(_)) => {
            session.observations().destroy(observer_id);
            return Err(FacadeStatus::RequestTimeout);
        }
        Ok(Ok(body)) => match protocol::decode_send_resp(
            protocol::MessageType::ServerSendResp,
            Method::ObservedGet,
            &body,
        ) {
            Ok(SendRespPayload::ObGetEstab(resp)) => from_device_status(resp.status),
            _ => {
                session.observations().destroy(observer_id);
                return Err(FacadeStatus::InternalServerError);
            }
        },
    };

    if establish_status != FacadeStatus::Continue {
        session.observations().destroy(observer_id);
        return Err(establish_status);
    }

    let (out_tx, out_rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(stream_observation(
        session, observer_id, observation, out_tx, cancel,
    ));
    Ok(out_rx)
}

async fn stream_observation(
    session: Arc<Session>,
    observer_id: u16,
    mut observation: crate::session::Observation,
    out_tx: tokio::sync::mpsc::Sender<ObservationFrame>,
    cancel: CancellationToken,
) {
    let mut frame_id = 0u64;
    loop {
        tokio::select! {
            _ = observation.done_rx.recv() => {
                let _ = out_tx.send(ObservationFrame {
                    frame_id,
                    status: FacadeStatus::DeviceOffline,
                    data: Vec::new(),
                }).await;
                break;
            }
            _ = cancel.cancelled() => break,
            notification = observation.notify_rx.recv() => {
                let Some(notification) = notification else {
                    let _ = out_tx.send(ObservationFrame {
                        frame_id,
                        status: FacadeStatus::Terminate,
                        data: Vec::new(),
                    }).await;
                    break;
                };
                let status = from_device_status(notification.status);
                let done = status != FacadeStatus::Continue;
                if out_tx.send(ObservationFrame {
                    frame_id,
                    status,
                    data: notification.data,
                }).await.is_err() {
                    break;
                }
                frame_id += 1;
                if done {
                    break;
                }
            }
        }
    }
    session.observations().destroy(observer_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn co_resp_inset_leaves_room_for_status_byte() {
        assert_eq!(CO_RESP_INSET, 1);
    }
}
