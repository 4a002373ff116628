//! Session state machine
//!
//! The per-connection engine: `Accepted -> AwaitingVerify -> Verified ->
//! Closing -> Closed`, driven by exactly three cooperating activities
//! spawned by [`run`]: the incoming decoder, the outgoing writer, and the
//! supervisor that owns the verify/heartbeat/sweep timers and cancels the
//! other two on any terminal condition.

use super::ids::RollingId;
use super::observation::{Observation, ObservationRegistry};
use super::pending::{PendingStore, SWEEP_INTERVAL};
use crate::audit::SharedAuditLogger;
use crate::backend::{DeviceServiceClient, DeviceVerifierClient};
use crate::backend::service_client::ServicePostOutcome;
use crate::registry::SessionRegistry;
use common::{ConfigStore, device_service_key};
use protocol::{
    CapLevel, CoReq, CoResp, Header, Method, MessageType, ObGetNotifyReq, ObGetNotifyResp,
    RemoteCode, SendReqPayload, SendRespPayload, StatusCode, VerifyRespBody,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Hard deadline for a device to complete verification after connecting.
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(15);
/// Device-proposed heartbeat interval bounds, seconds.
pub const HEARTBEAT_PROPOSAL_RANGE: std::ops::RangeInclusive<u32> = 30..=43_200;
/// Heartbeat tolerance multiplier applied to the active interval.
pub const HEARTBEAT_TOLERANCE: f64 = 1.5;
/// Depth of a session's outgoing frame queue.
pub const OUTGOING_QUEUE_DEPTH: usize = 10;

/// Shared collaborators a session needs beyond its own state: the backend
/// clients it calls out to and the registry it registers itself into on a
/// successful verify.
pub struct SessionDeps {
    pub verifier: Arc<DeviceVerifierClient>,
    pub device_service: Arc<DeviceServiceClient>,
    pub config_store: Arc<dyn ConfigStore>,
    pub registry: Arc<SessionRegistry>,
    pub audit: SharedAuditLogger,
    pub observer_cap: usize,
    /// Heartbeat interval assumed until the device proposes its own via a ping.
    pub default_heartbeat_secs: u32,
}

/// Per-connection session state. Constructed by the listener on accept and
/// driven to completion by [`run`].
pub struct Session {
    pub remote_addr: String,
    deps: Arc<SessionDeps>,

    verified: AtomicBool,
    device_id: Mutex<Option<String>>,
    body_cap_size: AtomicUsize,
    heartbeat_secs: AtomicU64,
    heartbeat_deadline: Mutex<Instant>,

    header_ids: RollingId,
    observer_ids: RollingId,
    pending: PendingStore,
    observations: ObservationRegistry,

    outgoing_tx: mpsc::Sender<Vec<u8>>,
    outgoing_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,

    cancel: CancellationToken,
    done: AtomicBool,
    done_notify: Notify,

    /// Set once the session has been added to the registry, so teardown
    /// knows whether to remove it.
    registered: AtomicBool,
}

impl Session {
    /// `parent_cancel` is the listener's shutdown token; the session's own
    /// token is a child of it, so cancelling the listener tears every live
    /// session down too, independent of each session's own timeouts.
    pub fn new(remote_addr: String, deps: Arc<SessionDeps>, parent_cancel: &CancellationToken) -> Arc<Self> {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE_DEPTH);
        let default_heartbeat_secs = deps.default_heartbeat_secs;
        Arc::new(Self {
            remote_addr,
            observations: ObservationRegistry::new(deps.observer_cap.max(1).min(1024)),
            deps,
            verified: AtomicBool::new(false),
            device_id: Mutex::new(None),
            body_cap_size: AtomicUsize::new(CapLevel::L0.body_cap_size()),
            heartbeat_secs: AtomicU64::new(default_heartbeat_secs as u64),
            heartbeat_deadline: Mutex::new(Instant::now() + heartbeat_timeout(default_heartbeat_secs)),
            header_ids: RollingId::new(),
            observer_ids: RollingId::new(),
            pending: PendingStore::new(),
            outgoing_tx,
            outgoing_rx: Mutex::new(Some(outgoing_rx)),
            cancel: parent_cancel.child_token(),
            done: AtomicBool::new(false),
            done_notify: Notify::new(),
            registered: AtomicBool::new(false),
        })
    }

    pub fn is_verified(&self) -> bool {
        self.verified.load(Ordering::Acquire)
    }

    pub async fn device_id(&self) -> Option<String> {
        self.device_id.lock().await.clone()
    }

    pub fn body_cap_size(&self) -> usize {
        self.body_cap_size.load(Ordering::Acquire)
    }

    pub fn next_header_id(&self) -> u16 {
        self.header_ids.next()
    }

    pub fn next_observer_id(&self) -> u16 {
        self.observer_ids.next()
    }

    pub fn pending(&self) -> &PendingStore {
        &self.pending
    }

    pub fn observations(&self) -> &ObservationRegistry {
        &self.observations
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Enqueues an already-encoded frame for the outgoing writer. Blocks if
    /// the queue is full (depth `OUTGOING_QUEUE_DEPTH`).
    pub async fn enqueue(&self, frame: Vec<u8>) -> bool {
        self.outgoing_tx.send(frame).await.is_ok()
    }

    /// Resolves once the session has fully torn down.
    pub async fn wait_done(&self) {
        loop {
            if self.done.load(Ordering::Acquire) {
                return;
            }
            self.done_notify.notified().await;
        }
    }

    fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
        self.done_notify.notify_waiters();
    }

    #[cfg(test)]
    pub fn force_mark_done_for_test(&self) {
        self.mark_done();
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn reset_heartbeat_deadline(&self) {
        let secs = self.heartbeat_secs.load(Ordering::Acquire) as u32;
        *self.heartbeat_deadline.lock().await = Instant::now() + heartbeat_timeout(secs);
    }
}

fn heartbeat_timeout(heartbeat_secs: u32) -> Duration {
    Duration::from_secs_f64(heartbeat_secs as f64 * HEARTBEAT_TOLERANCE)
}

/// Drives a single accepted connection to completion. `stream` must be a
/// full-duplex byte stream (plain TCP or a TLS-wrapped one); this function
/// owns it for the session's lifetime.
pub async fn run<S>(session: Arc<Session>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let outgoing_rx = session
        .outgoing_rx
        .lock()
        .await
        .take()
        .expect("run called more than once on the same session");

    let incoming = tokio::spawn(incoming_loop(session.clone(), read_half));
    let outgoing = tokio::spawn(outgoing_loop(session.clone(), write_half, outgoing_rx));

    supervise(&session).await;

    session.cancel();
    let _ = incoming.await;
    let _ = outgoing.await;

    session.observations.teardown();

    if session.registered.load(Ordering::Acquire) {
        if let Some(device_id) = session.device_id().await {
            session
                .deps
                .registry
                .del_if_current(&device_id, &session)
                .await;
        }
    }

    session.mark_done();
    debug!(remote_addr = %session.remote_addr, "session closed");
}

async fn supervise(session: &Arc<Session>) {
    let verify_deadline = Instant::now() + VERIFY_TIMEOUT;
    let mut sweep_ticker = tokio::time::interval(SWEEP_INTERVAL);
    sweep_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let heartbeat_deadline = *session.heartbeat_deadline.lock().await;
        let verified = session.is_verified();

        tokio::select! {
            _ = session.cancel.cancelled() => {
                debug!("session cancelled externally");
                return;
            }
            _ = tokio::time::sleep_until(verify_deadline.into()), if !verified => {
                info!(remote_addr = %session.remote_addr, "verify timeout");
                return;
            }
            _ = tokio::time::sleep_until(heartbeat_deadline.into()), if verified => {
                let device_id = session.device_id().await;
                info!(?device_id, "heartbeat timeout");
                if let Some(audit) = session.deps.audit.as_ref() {
                    if let Some(id) = &device_id {
                        audit.log_heartbeat_timeout(id);
                    }
                }
                return;
            }
            _ = sweep_ticker.tick() => {
                session.pending.sweep();
            }
        }
    }
}

async fn incoming_loop<R: AsyncRead + Send + 'static>(session: Arc<Session>, mut reader: ReadHalf<R>) {
    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => return,
            result = read_frame(&mut reader) => {
                let (header, body) = match result {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(remote_addr = %session.remote_addr, error = %e, "incoming frame error, closing session");
                        session.cancel();
                        return;
                    }
                };
                if let Err(e) = dispatch(&session, header, body).await {
                    debug!(remote_addr = %session.remote_addr, error = %e, "dispatch error, closing session");
                    session.cancel();
                    return;
                }
            }
        }
    }
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<(Header, Vec<u8>)> {
    let mut header_buf = [0u8; protocol::HEADER_LEN];
    reader.read_exact(&mut header_buf).await?;
    let header = protocol::decode_header(&header_buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mut body = vec![0u8; header.body_len as usize];
    reader.read_exact(&mut body).await?;
    Ok((header, body))
}

async fn outgoing_loop<W: AsyncWrite + Send + 'static>(
    session: Arc<Session>,
    mut writer: WriteHalf<W>,
    mut rx: mpsc::Receiver<Vec<u8>>,
) {
    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => return,
            frame = rx.recv() => {
                let Some(frame) = frame else { return };
                if let Err(e) = writer.write_all(&frame).await {
                    debug!(remote_addr = %session.remote_addr, error = %e, "write error, closing session");
                    session.cancel();
                    return;
                }
                if writer.flush().await.is_err() {
                    session.cancel();
                    return;
                }
            }
        }
    }
}

async fn dispatch(session: &Arc<Session>, header: Header, body: Vec<u8>) -> protocol::Result<()> {
    match header.msg_type {
        MessageType::DeviceVerifyReq => handle_verify(session, header.id, &body).await,
        MessageType::DevicePingReq => handle_ping(session, header.id, &body).await,
        MessageType::DeviceSendReq => handle_device_send(session, header.id, &body).await,
        MessageType::ServerSendResp => handle_server_resp(session, header.id, &body).await,
        other => Err(protocol::ProtocolError::UnknownMessageType(other.nibble())),
    }
}

async fn handle_verify(session: &Arc<Session>, id: u16, body: &[u8]) -> protocol::Result<()> {
    let parsed = protocol::decode_verify_req(body)?;

    if parsed.device_id.is_empty()
        || !protocol::DEVICE_ID_BUSINESS_RANGE.contains(&parsed.device_id.len())
    {
        reply_verify(session, id, RemoteCode::ParaInvalid).await;
        return Ok(());
    }

    match session
        .deps
        .verifier
        .verify(&parsed.device_id, &parsed.secret)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            reply_verify(session, id, RemoteCode::VerifyFail).await;
            if let Some(audit) = session.deps.audit.as_ref() {
                audit.log_verify_failed(&parsed.device_id, "rejected by verifier");
            }
            return Ok(());
        }
        Err(e) => {
            warn!(error = %e, "device verifier transport error");
            reply_verify(session, id, RemoteCode::UnknownErr).await;
            return Ok(());
        }
    }

    session
        .body_cap_size
        .store(parsed.cap_level.body_cap_size(), Ordering::Release);
    session.verified.store(true, Ordering::Release);
    *session.device_id.lock().await = Some(parsed.device_id.clone());
    session.reset_heartbeat_deadline().await;

    reply_verify(session, id, RemoteCode::Success).await;

    session.deps.registry.add(parsed.device_id.clone(), session.clone()).await;
    session.registered.store(true, Ordering::Release);

    if let Some(audit) = session.deps.audit.as_ref() {
        audit.log_session_verified(&parsed.device_id, &session.remote_addr);
    }

    Ok(())
}

async fn reply_verify(session: &Arc<Session>, id: u16, code: RemoteCode) {
    if let Ok(frame) = protocol::encode_verify_resp(id, VerifyRespBody { code }) {
        session.enqueue(frame).await;
    }
}

async fn handle_ping(session: &Arc<Session>, id: u16, body: &[u8]) -> protocol::Result<()> {
    let parsed = protocol::decode_ping_req(body)?;

    let code = if parsed.heartbeat_secs == 0 {
        RemoteCode::Success
    } else if HEARTBEAT_PROPOSAL_RANGE.contains(&parsed.heartbeat_secs) {
        session
            .heartbeat_secs
            .store(parsed.heartbeat_secs as u64, Ordering::Release);
        RemoteCode::Success
    } else {
        RemoteCode::ParaInvalid
    };

    session.reset_heartbeat_deadline().await;

    if let Ok(frame) = protocol::encode_ping_resp(id, protocol::PingRespBody { code }) {
        session.enqueue(frame).await;
    }
    Ok(())
}

async fn handle_device_send(session: &Arc<Session>, id: u16, body: &[u8]) -> protocol::Result<()> {
    let payload = protocol::decode_send_req(MessageType::DeviceSendReq, body)?;
    session.reset_heartbeat_deadline().await;

    match payload {
        SendReqPayload::Co(req) => handle_device_co_req(session, id, req).await,
        SendReqPayload::ObGetNotify(req) => handle_device_notify(session, id, req).await,
        // decode_send_req never produces this shape for DeviceSendReq: the
        // ObservedGet method on a device-originated request always decodes
        // as a notification, never an establish.
        SendReqPayload::ObGetEstab(_) => unreachable!("establish never arrives as DeviceSendReq"),
    }
    Ok(())
}

async fn handle_device_co_req(session: &Arc<Session>, id: u16, req: CoReq) {
    let key = device_service_key(&protocol::hex_digest(req.uri_hash));
    let url = session.deps.config_store.get_string(&key);

    let resp = match url {
        None => CoResp {
            status: StatusCode::NotFound,
            data: Vec::new(),
        },
        Some(url) => match session
            .deps
            .device_service
            .post(&url, session.device_id().await.as_deref().unwrap_or(""), &req.data)
            .await
        {
            ServicePostOutcome::Ok(data) => CoResp {
                status: StatusCode::Ok,
                data,
            },
            ServicePostOutcome::BadRequest => CoResp {
                status: StatusCode::BadRequest,
                data: Vec::new(),
            },
            ServicePostOutcome::InternalServerError => {
                if let Some(audit) = session.deps.audit.as_ref() {
                    audit.log_backend_call_failed(&url, "device service call failed");
                }
                CoResp {
                    status: StatusCode::InternalServerError,
                    data: Vec::new(),
                }
            }
        },
    };

    if let Ok(frame) = protocol::encode_send_resp(
        MessageType::DeviceSendResp,
        id,
        &SendRespPayload::Co(resp),
    ) {
        session.enqueue(frame).await;
    }
}

async fn handle_device_notify(session: &Arc<Session>, id: u16, req: ObGetNotifyReq) {
    let known = session.observations().sender_for(req.observer_id).is_some();

    let ack_status = if known {
        StatusCode::Continue
    } else {
        StatusCode::Terminate
    };
    if let Ok(frame) = protocol::encode_send_resp(
        MessageType::DeviceSendResp,
        id,
        &SendRespPayload::ObGetNotify(ObGetNotifyResp { status: ack_status }),
    ) {
        session.enqueue(frame).await;
    }

    session.observations().push(req).await;
}

async fn handle_server_resp(session: &Arc<Session>, id: u16, body: &[u8]) -> protocol::Result<()> {
    session.reset_heartbeat_deadline().await;
    match session.pending().deliver(id, body.to_vec()) {
        Some(_method) => {}
        None => {
            debug!(remote_addr = %session.remote_addr, id, "response for unknown or expired header id, dropped");
        }
    }
    Ok(())
}

/// Establishes a new observation and returns the handle, failing with
/// `TooManyObservers` when the session is already at its observer cap.
pub fn create_observation(session: &Session) -> Result<(u16, Observation), super::observation::TooManyObservers> {
    let observer_id = session.next_observer_id();
    let observation = session.observations().create(observer_id)?;
    Ok((observer_id, observation))
}
