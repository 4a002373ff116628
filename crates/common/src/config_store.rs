//! Narrow runtime configuration store
//!
//! Mirrors the upstream system's externally owned configuration store: a
//! flat string namespace and a flat bool namespace, read through `get`-shaped
//! calls rather than a typed struct. The session's device-to-server dispatch
//! path reads backend-service URLs through this trait (`deviceservice.<hash>`
//! keys); the backend-connection bootstrap reads `disable.deviceverify` and
//! `backend.deviceverifier`/`backend.hubconfiger` through it. Keeping this a
//! trait, rather than a concrete map, is what lets tests substitute a fixed
//! set of values without touching a file or a backend.

use std::collections::HashMap;
use std::sync::RwLock;

/// Narrow interface onto process-wide runtime configuration.
///
/// Implementors must be `Send + Sync`; the default implementation is an
/// in-memory concurrent map seeded at startup and updated by the hub-config
/// puller as new values arrive.
pub trait ConfigStore: Send + Sync {
    fn get_string(&self, name: &str) -> Option<String>;
    fn set_string(&self, name: &str, value: String);
    fn get_bool_with_default(&self, name: &str, default: bool) -> bool;
}

/// Default in-memory implementation backed by an `RwLock<HashMap>`.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    strings: RwLock<HashMap<String, String>>,
    bools: RwLock<HashMap<String, bool>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bool(&self, name: &str, value: bool) {
        self.bools.write().unwrap().insert(name.to_string(), value);
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn get_string(&self, name: &str) -> Option<String> {
        self.strings.read().unwrap().get(name).cloned()
    }

    fn set_string(&self, name: &str, value: String) {
        self.strings.write().unwrap().insert(name.to_string(), value);
    }

    fn get_bool_with_default(&self, name: &str, default: bool) -> bool {
        self.bools
            .read()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(default)
    }
}

/// Builds the `deviceservice.<hex-hash>` key the device-to-server dispatch
/// path looks up for a given URI, matching the hub-config puller's key format.
pub fn device_service_key(uri_hash_hex: &str) -> String {
    format!("deviceservice.{uri_hash_hex}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_string_is_none() {
        let store = InMemoryConfigStore::new();
        assert_eq!(store.get_string("missing"), None);
    }

    #[test]
    fn set_then_get_string_round_trips() {
        let store = InMemoryConfigStore::new();
        store.set_string("backend.deviceverifier", "https://verifier.example".to_string());
        assert_eq!(
            store.get_string("backend.deviceverifier"),
            Some("https://verifier.example".to_string())
        );
    }

    #[test]
    fn bool_default_applies_when_unset() {
        let store = InMemoryConfigStore::new();
        assert!(!store.get_bool_with_default("disable.deviceverify", false));
        store.set_bool("disable.deviceverify", true);
        assert!(store.get_bool_with_default("disable.deviceverify", false));
    }

    #[test]
    fn device_service_key_matches_expected_format() {
        assert_eq!(device_service_key("0000abcd"), "deviceservice.0000abcd");
    }
}
