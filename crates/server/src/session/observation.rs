//! Observation registry
//!
//! Per-session map from observer id to a notification channel. The registry
//! owns the send half (fed by the incoming decode loop when a device pushes
//! an `ObGetNotifyReq`); the receive half is handed to the front adapter's
//! notify loop at `create` time. A session-wide broadcast signals every live
//! observation exactly once on teardown, avoiding a session <-> observation
//! reference cycle (the observation only ever holds the done signal, never
//! a handle back to the session).

use protocol::ObGetNotifyReq;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};

/// Default cap on concurrent observers per session (`OBGET_OBSERVERS_MAX`).
pub const DEFAULT_OBSERVER_CAP: usize = 8;

/// Capacity of a single observation's notification channel. The device is
/// expected to wait for our ack before sending the next notification, so a
/// buffer of one is sufficient and back-pressure beyond it is intentional.
const NOTIFY_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug)]
pub struct TooManyObservers;

/// Handle returned to the front adapter when an observation is established.
pub struct Observation {
    pub observer_id: u16,
    pub notify_rx: mpsc::Receiver<ObGetNotifyReq>,
    pub done_rx: broadcast::Receiver<()>,
}

pub struct ObservationRegistry {
    cap: usize,
    done_tx: broadcast::Sender<()>,
    observers: Mutex<HashMap<u16, mpsc::Sender<ObGetNotifyReq>>>,
}

impl ObservationRegistry {
    pub fn new(cap: usize) -> Self {
        let (done_tx, _) = broadcast::channel(1);
        Self {
            cap,
            done_tx,
            observers: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    /// Registers a new observation under `observer_id`. Fails with
    /// `TooManyObservers` if the cap is already reached.
    pub fn create(&self, observer_id: u16) -> Result<Observation, TooManyObservers> {
        let mut observers = self.observers.lock().unwrap();
        if observers.len() >= self.cap {
            return Err(TooManyObservers);
        }
        let (tx, rx) = mpsc::channel(NOTIFY_CHANNEL_CAPACITY);
        observers.insert(observer_id, tx);
        Ok(Observation {
            observer_id,
            notify_rx: rx,
            done_rx: self.done_tx.subscribe(),
        })
    }

    /// Removes an observation. Idempotent: destroying an unknown or
    /// already-destroyed id is a no-op.
    pub fn destroy(&self, observer_id: u16) {
        self.observers.lock().unwrap().remove(&observer_id);
    }

    /// Returns a clone of the notification sender for `observer_id`, without
    /// blocking. The caller uses this to decide the ack (`Continue` if
    /// known, `Terminate` if not) before attempting the (possibly blocking)
    /// push itself.
    pub fn sender_for(&self, observer_id: u16) -> Option<mpsc::Sender<ObGetNotifyReq>> {
        self.observers.lock().unwrap().get(&observer_id).cloned()
    }

    /// Pushes an incoming notification to its observation's channel. Returns
    /// `false` if the observer id is unknown, so the caller can reply
    /// `Terminate` to the device. Blocks (back-pressure) if the channel is
    /// already full of an undelivered notification.
    pub async fn push(&self, notification: ObGetNotifyReq) -> bool {
        match self.sender_for(notification.observer_id) {
            Some(sender) => sender.send(notification).await.is_ok(),
            None => false,
        }
    }

    /// Signals every live observation exactly once, then clears the map.
    pub fn teardown(&self) {
        let _ = self.done_tx.send(());
        self.observers.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::StatusCode;

    fn notify(observer_id: u16) -> ObGetNotifyReq {
        ObGetNotifyReq {
            observer_id,
            status: StatusCode::Continue,
            data: b"1".to_vec(),
        }
    }

    #[tokio::test]
    async fn cap_plus_one_create_fails_until_a_destroy() {
        let registry = ObservationRegistry::new(2);
        let a = registry.create(1).unwrap();
        let _b = registry.create(2).unwrap();
        assert!(registry.create(3).is_err());

        drop(a);
        registry.destroy(1);
        assert!(registry.create(3).is_ok());
    }

    #[tokio::test]
    async fn push_to_unknown_observer_returns_false() {
        let registry = ObservationRegistry::new(8);
        assert!(!registry.push(notify(42)).await);
    }

    #[tokio::test]
    async fn push_then_receive_round_trips() {
        let registry = ObservationRegistry::new(8);
        let mut obs = registry.create(1).unwrap();
        assert!(registry.push(notify(1)).await);
        let received = obs.notify_rx.recv().await.unwrap();
        assert_eq!(received.observer_id, 1);
    }

    #[tokio::test]
    async fn teardown_signals_done_exactly_once() {
        let registry = ObservationRegistry::new(8);
        let mut obs = registry.create(1).unwrap();
        registry.teardown();
        obs.done_rx.recv().await.unwrap();
        assert_eq!(registry.len(), 0);
    }
}
