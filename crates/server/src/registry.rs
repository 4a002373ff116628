//! Session registry (C5)
//!
//! Concurrent map from deviceID to the active session for that device.
//! `add` enforces single-owner-per-device: an existing entry for the same
//! deviceID is cancelled and awaited before being replaced, so two
//! connections verifying as the same device never run side by side.

use crate::session::Session;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    count: AtomicUsize,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `session` under `device_id`. If a session is already
    /// registered for this device, it is cancelled and its teardown is
    /// awaited before the new one takes its place.
    pub async fn add(&self, device_id: String, session: Arc<Session>) {
        let previous = {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(device_id, session)
        };

        if let Some(previous) = previous {
            previous.cancel_token().cancel();
            previous.wait_done().await;
        } else {
            self.count.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub async fn del(&self, device_id: &str) {
        if self.sessions.lock().await.remove(device_id).is_some() {
            self.count.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Removes `device_id`'s entry only if it still points at `session`.
    /// A session's own teardown uses this rather than [`Self::del`] so a
    /// session that lost ownership to a newer verify for the same device
    /// doesn't delete its successor's entry.
    pub async fn del_if_current(&self, device_id: &str, session: &Arc<Session>) {
        let mut sessions = self.sessions.lock().await;
        if let Some(current) = sessions.get(device_id) {
            if Arc::ptr_eq(current, session) {
                sessions.remove(device_id);
                self.count.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    pub async fn get(&self, device_id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(device_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::SharedAuditLogger;
    use crate::backend::{DeviceServiceClient, DeviceVerifierClient, build_http_client};
    use crate::session::SessionDeps;
    use common::InMemoryConfigStore;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn deps(registry: Arc<SessionRegistry>) -> Arc<SessionDeps> {
        let http = build_http_client(Duration::from_secs(5));
        let config_store = Arc::new(InMemoryConfigStore::new());
        config_store.set_bool("disable.deviceverify", true);
        Arc::new(SessionDeps {
            verifier: Arc::new(DeviceVerifierClient::new(http.clone(), None, config_store.clone())),
            device_service: Arc::new(DeviceServiceClient::new(http)),
            config_store,
            registry,
            audit: SharedAuditLogger::default(),
            observer_cap: 8,
            default_heartbeat_secs: 300,
        })
    }

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let registry = SessionRegistry::new();
        let session = Session::new("127.0.0.1:1".to_string(), deps(registry.clone()), &CancellationToken::new());
        registry.add("dev-1".to_string(), session.clone()).await;
        assert!(registry.get("dev-1").await.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn re_add_cancels_and_waits_for_the_previous_session() {
        let registry = SessionRegistry::new();
        let first = Session::new("127.0.0.1:1".to_string(), deps(registry.clone()), &CancellationToken::new());
        registry.add("dev-1".to_string(), first.clone()).await;

        let second = Session::new("127.0.0.1:2".to_string(), deps(registry.clone()), &CancellationToken::new());
        // No run() loop drives `first`, so mark it done manually to simulate
        // the supervisor's teardown completing after cancellation.
        let first_for_task = first.clone();
        tokio::spawn(async move {
            first_for_task.cancel_token().cancelled().await;
            first_for_task.force_mark_done_for_test();
        });

        registry.add("dev-1".to_string(), second.clone()).await;
        assert!(first.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn del_drops_the_count() {
        let registry = SessionRegistry::new();
        let session = Session::new("127.0.0.1:1".to_string(), deps(registry.clone()), &CancellationToken::new());
        registry.add("dev-1".to_string(), session).await;
        registry.del("dev-1").await;
        assert_eq!(registry.len(), 0);
        assert!(registry.get("dev-1").await.is_none());
    }
}
