//! Pending-correlation store
//!
//! The sole rendezvous between a server-originated outgoing request (CoPost,
//! ObGet establish) and the incoming path that carries its response. Keyed
//! by the 16-bit header id the request was sent with.

use protocol::Method;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Default lifetime of a pending entry before the sweep removes it.
pub const PENDING_TTL: Duration = Duration::from_secs(120);
/// Cadence of the sweep that removes expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

struct Entry {
    method: Method,
    sender: oneshot::Sender<Vec<u8>>,
    inserted_at: Instant,
}

/// A response delivered by `ServerSendResp` demux, handed back to the waiter.
pub struct Delivery {
    pub method: Method,
    pub body: Vec<u8>,
}

#[derive(Default)]
pub struct PendingStore {
    entries: Mutex<HashMap<u16, Entry>>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `id`, returning the receiver half.
    pub fn set(&self, id: u16, method: Method) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        let entry = Entry {
            method,
            sender: tx,
            inserted_at: Instant::now(),
        };
        self.entries.lock().unwrap().insert(id, entry);
        rx
    }

    /// Removes and returns the method recorded for `id`, without delivering
    /// anything. Used when a request is abandoned locally before a response
    /// arrives (sweep overlap or caller cancellation).
    pub fn del(&self, id: u16) {
        self.entries.lock().unwrap().remove(&id);
    }

    /// Delivers `body` to the waiter for `id`, if still present. Returns
    /// `None` if the id is unknown (already delivered, swept, or never
    /// registered) so the caller can log and drop.
    pub fn deliver(&self, id: u16, body: Vec<u8>) -> Option<Method> {
        let entry = self.entries.lock().unwrap().remove(&id)?;
        let method = entry.method;
        // Ignore a closed receiver: the original caller may have given up
        // locally already, which is not an error at this layer.
        let _ = entry.sender.send(body);
        Some(method)
    }

    /// Removes every entry whose age exceeds `PENDING_TTL`. Intended to be
    /// called every `SWEEP_INTERVAL` from the session supervisor.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .retain(|_, entry| now.duration_since(entry.inserted_at) < PENDING_TTL);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deliver_wakes_registered_waiter() {
        let store = PendingStore::new();
        let mut rx = store.set(1, Method::ConstrainedPost);
        let method = store.deliver(1, b"pong".to_vec());
        assert_eq!(method, Some(Method::ConstrainedPost));
        assert_eq!(rx.try_recv().unwrap(), b"pong");
    }

    #[test]
    fn deliver_to_unknown_id_returns_none() {
        let store = PendingStore::new();
        assert_eq!(store.deliver(99, vec![]), None);
    }

    #[test]
    fn del_removes_without_delivering() {
        let store = PendingStore::new();
        let rx = store.set(5, Method::ConstrainedGet);
        store.del(5);
        assert_eq!(store.len(), 0);
        drop(rx);
    }

    #[test]
    fn sweep_is_a_no_op_on_fresh_entries() {
        let store = PendingStore::new();
        let _rx = store.set(2, Method::ConstrainedGet);
        store.sweep();
        assert_eq!(store.len(), 1);
    }
}
