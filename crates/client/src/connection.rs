//! Reference device-side session (C11)
//!
//! A minimal counterpart to the hub's session state machine, used exclusively
//! by integration tests to drive the hub end to end over a real loopback
//! connection. It connects, verifies, answers pings, and lets a test install
//! handlers for constrained requests and observation establishes the hub
//! sends down; it can also originate a constrained POST or push an
//! observation notification itself, matching responses back to the request
//! that caused them the same way the hub's pending-correlation store does.

use crate::ids::RollingId;
use anyhow::{Context, Result, anyhow, bail};
use protocol::{
    CapLevel, CoReq, CoResp, Header, Method, MessageType, ObGetEstabReq, ObGetEstabResp,
    ObGetNotifyReq, PingReqBody, RemoteCode, SendReqPayload, SendRespPayload, StatusCode,
    VerifyReqBody,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long a round trip to the hub is allowed to take before the waiter gives up.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Depth of the outgoing frame queue handed to the writer task.
const OUTGOING_QUEUE_DEPTH: usize = 16;

type CoHandler = dyn Fn(CoReq) -> CoResp + Send + Sync;
type ObserveHandler = dyn Fn(ObGetEstabReq) -> StatusCode + Send + Sync;

struct Inner {
    ids: RollingId,
    pending: Mutex<HashMap<u16, oneshot::Sender<Vec<u8>>>>,
    outgoing_tx: mpsc::Sender<Vec<u8>>,
    co_handler: Mutex<Option<Box<CoHandler>>>,
    observe_handler: Mutex<Option<Box<ObserveHandler>>>,
    cancel: CancellationToken,
}

impl Inner {
    fn register(&self, id: u16) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);
        rx
    }

    fn forget(&self, id: u16) {
        self.pending.lock().unwrap().remove(&id);
    }

    fn deliver(&self, id: u16, body: Vec<u8>) {
        if let Some(tx) = self.pending.lock().unwrap().remove(&id) {
            let _ = tx.send(body);
        } else {
            debug!(id, "response for unknown or already-delivered id, dropped");
        }
    }
}

/// A device-side connection to the hub.
pub struct DeviceClient {
    inner: Arc<Inner>,
}

impl DeviceClient {
    /// Connects to `addr` and starts the reader/writer tasks. Does not verify.
    pub async fn connect(addr: &str) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        stream.set_nodelay(true).ok();
        let (mut read_half, mut write_half) = stream.into_split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Vec<u8>>(OUTGOING_QUEUE_DEPTH);
        let cancel = CancellationToken::new();

        let inner = Arc::new(Inner {
            ids: RollingId::new(),
            pending: Mutex::new(HashMap::new()),
            outgoing_tx,
            co_handler: Mutex::new(None),
            observe_handler: Mutex::new(None),
            cancel: cancel.clone(),
        });

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => return,
                    frame = outgoing_rx.recv() => {
                        let Some(frame) = frame else { return };
                        if write_half.write_all(&frame).await.is_err() || write_half.flush().await.is_err() {
                            writer_cancel.cancel();
                            return;
                        }
                    }
                }
            }
        });

        let reader_inner = inner.clone();
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => return,
                    result = read_frame(&mut read_half) => {
                        let (header, body) = match result {
                            Ok(frame) => frame,
                            Err(e) => {
                                debug!(error = %e, "incoming frame error, closing connection");
                                reader_cancel.cancel();
                                return;
                            }
                        };
                        if let Err(e) = dispatch_incoming(&reader_inner, header, body).await {
                            warn!(error = %e, "dispatch error, closing connection");
                            reader_cancel.cancel();
                            return;
                        }
                    }
                }
            }
        });

        Ok(Arc::new(Self { inner }))
    }

    /// Installs the handler invoked for a constrained GET/POST the hub sends down.
    pub fn set_co_handler<F>(&self, handler: F)
    where
        F: Fn(CoReq) -> CoResp + Send + Sync + 'static,
    {
        *self.inner.co_handler.lock().unwrap() = Some(Box::new(handler));
    }

    /// Installs the handler invoked when the hub establishes an observation.
    /// Returns the device's initial status for the observation.
    pub fn set_observe_handler<F>(&self, handler: F)
    where
        F: Fn(ObGetEstabReq) -> StatusCode + Send + Sync + 'static,
    {
        *self.inner.observe_handler.lock().unwrap() = Some(Box::new(handler));
    }

    async fn enqueue(&self, frame: Vec<u8>) -> Result<()> {
        self.inner
            .outgoing_tx
            .send(frame)
            .await
            .map_err(|_| anyhow!("connection closed"))
    }

    async fn roundtrip(&self, id: u16, frame: Vec<u8>) -> Result<Vec<u8>> {
        let rx = self.inner.register(id);
        if let Err(e) = self.enqueue(frame).await {
            self.inner.forget(id);
            return Err(e);
        }
        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => bail!("connection closed before response for id {id}"),
            Err(_) => {
                self.inner.forget(id);
                bail!("timed out waiting for response to id {id}")
            }
        }
    }

    /// Sends `DeviceVerifyReq` and waits for `DeviceVerifyResp`.
    pub async fn verify(&self, cap_level: CapLevel, device_id: &str, secret: &str) -> Result<RemoteCode> {
        let id = self.inner.ids.next();
        let frame = protocol::encode_verify_req(
            id,
            &VerifyReqBody {
                cap_level,
                device_id: device_id.to_string(),
                secret: secret.to_string(),
            },
        )
        .context("failed to encode verify request")?;
        let body = self.roundtrip(id, frame).await?;
        let resp = protocol::decode_verify_resp(&body).context("malformed verify response")?;
        Ok(resp.code)
    }

    /// Sends `DevicePingReq` proposing `heartbeat_secs` (0 keeps the current
    /// interval) and waits for `DevicePingResp`.
    pub async fn ping(&self, heartbeat_secs: u32) -> Result<RemoteCode> {
        let id = self.inner.ids.next();
        let frame = protocol::encode_ping_req(id, PingReqBody { heartbeat_secs })
            .context("failed to encode ping request")?;
        let body = self.roundtrip(id, frame).await?;
        let resp = protocol::decode_ping_resp(&body).context("malformed ping response")?;
        Ok(resp.code)
    }

    /// Spawns a background task that pings the hub every `interval` until
    /// the connection closes.
    pub fn spawn_heartbeat(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let client = self.clone();
        let cancel = client.inner.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if client.ping(0).await.is_err() {
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Drives a constrained POST from the device side: sends `DeviceSendReq`
    /// and waits for the hub's `DeviceSendResp`.
    pub async fn co_post(&self, uri_hash: u32, data: Vec<u8>) -> Result<CoResp> {
        let id = self.inner.ids.next();
        let payload = SendReqPayload::Co(CoReq {
            method: Method::ConstrainedPost,
            uri_hash,
            data,
        });
        let frame = protocol::encode_send_req(MessageType::DeviceSendReq, id, &payload)
            .context("failed to encode device send request")?;
        let body = self.roundtrip(id, frame).await?;
        match protocol::decode_send_resp(MessageType::DeviceSendResp, Method::ConstrainedPost, &body)
            .context("malformed device send response")?
        {
            SendRespPayload::Co(resp) => Ok(resp),
            _ => bail!("unexpected send-response shape for a constrained POST"),
        }
    }

    /// Pushes an observation notification for `observer_id` and waits for
    /// the hub's ack (`Continue` to keep pushing, anything else to stop).
    pub async fn notify(&self, observer_id: u16, status: StatusCode, data: Vec<u8>) -> Result<StatusCode> {
        let id = self.inner.ids.next();
        let payload = SendReqPayload::ObGetNotify(ObGetNotifyReq {
            observer_id,
            status,
            data,
        });
        let frame = protocol::encode_send_req(MessageType::DeviceSendReq, id, &payload)
            .context("failed to encode notification")?;
        let body = self.roundtrip(id, frame).await?;
        match protocol::decode_send_resp(MessageType::DeviceSendResp, Method::ObservedGet, &body)
            .context("malformed notification ack")?
        {
            SendRespPayload::ObGetNotify(resp) => Ok(resp.status),
            _ => bail!("unexpected send-response shape for a notification ack"),
        }
    }

    /// Closes the connection, tearing down the reader and writer tasks.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }
}

async fn read_frame(reader: &mut tokio::net::tcp::OwnedReadHalf) -> std::io::Result<(Header, Vec<u8>)> {
    let mut header_buf = [0u8; protocol::HEADER_LEN];
    reader.read_exact(&mut header_buf).await?;
    let header = protocol::decode_header(&header_buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mut body = vec![0u8; header.body_len as usize];
    reader.read_exact(&mut body).await?;
    Ok((header, body))
}

async fn dispatch_incoming(inner: &Arc<Inner>, header: Header, body: Vec<u8>) -> Result<()> {
    match header.msg_type {
        MessageType::DeviceVerifyResp | MessageType::DevicePingResp | MessageType::DeviceSendResp => {
            inner.deliver(header.id, body);
            Ok(())
        }
        MessageType::ServerSendReq => handle_server_send(inner, header.id, &body).await,
        other => Err(anyhow!("unexpected message type on device side: {other:?}")),
    }
}

async fn handle_server_send(inner: &Arc<Inner>, id: u16, body: &[u8]) -> Result<()> {
    let payload = protocol::decode_send_req(MessageType::ServerSendReq, body)
        .context("malformed server-send request")?;
    match payload {
        SendReqPayload::Co(req) => {
            let resp = match inner.co_handler.lock().unwrap().as_ref() {
                Some(handler) => handler(req),
                None => CoResp {
                    status: StatusCode::NotFound,
                    data: Vec::new(),
                },
            };
            let frame = protocol::encode_send_resp(
                MessageType::DeviceSendResp,
                id,
                &SendRespPayload::Co(resp),
            )
            .context("failed to encode co response")?;
            let _ = inner.outgoing_tx.send(frame).await;
        }
        SendReqPayload::ObGetEstab(req) => {
            let status = match inner.observe_handler.lock().unwrap().as_ref() {
                Some(handler) => handler(req),
                None => StatusCode::NotFound,
            };
            let frame = protocol::encode_send_resp(
                MessageType::DeviceSendResp,
                id,
                &SendRespPayload::ObGetEstab(ObGetEstabResp { status }),
            )
            .context("failed to encode observation establish response")?;
            let _ = inner.outgoing_tx.send(frame).await;
        }
        SendReqPayload::ObGetNotify(_) => {
            bail!("a notification never arrives as a server-send request")
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_id_never_yields_zero_on_wraparound() {
        let ids = RollingId::new();
        for _ in 0..(u16::MAX as u32 + 10) {
            assert_ne!(ids.next(), 0);
        }
    }
}
