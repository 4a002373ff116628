//! Hub-config puller
//!
//! Polls the hub-config backend every 5 seconds for `{id, code, config,
//! digest}` where `config` is the JSON document `{"deviceservicemap": {uri:
//! url}}` and `digest` is the CRC32-IEEE of the raw `config` substring. On a
//! digest change, the puller re-verifies the digest, parses the map, and
//! installs one `deviceservice.<hex(crc32(uri))>` entry per key into the
//! narrow config store. Only the puller itself is in scope here; the HTTP
//! surface that serves hub config to operators is an external collaborator.

use common::{ConfigStore, device_service_key};
use protocol::{crc32_ieee, hex_digest, uri_hash};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Debug, Deserialize)]
struct HubConfigResponse {
    #[allow(dead_code)]
    id: String,
    code: String,
    config: serde_json::Value,
    digest: String,
}

#[derive(Debug, Deserialize)]
struct HubConfigBody {
    #[serde(default)]
    deviceservicemap: HashMap<String, String>,
}

pub struct HubConfigPuller {
    http: Client,
    url: String,
    config_store: Arc<dyn ConfigStore>,
    poll_interval: Duration,
    last_digest: std::sync::Mutex<Option<String>>,
}

impl HubConfigPuller {
    pub fn new(
        http: Client,
        url: String,
        config_store: Arc<dyn ConfigStore>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            http,
            url,
            config_store,
            poll_interval,
            last_digest: std::sync::Mutex::new(None),
        }
    }

    /// Polls once, updating the config store if the digest changed. Returns
    /// `true` if an update was applied.
    pub async fn poll_once(&self) -> anyhow::Result<bool> {
        let body = serde_json::json!({ "id": poll_id(), "method": "getconfig" });

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<HubConfigResponse>()
            .await?;

        if resp.code != "OK" {
            anyhow::bail!("hub config poll returned code {}", resp.code);
        }

        let unchanged = self
            .last_digest
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|d| d == resp.digest);
        if unchanged {
            return Ok(false);
        }

        let config_str = resp.config.to_string();
        let computed = hex_digest(crc32_ieee(config_str.as_bytes()));
        if computed != resp.digest {
            warn!(
                "hub config digest mismatch: computed {} got {}",
                computed, resp.digest
            );
            anyhow::bail!("hub config digest mismatch");
        }

        let parsed: HubConfigBody = serde_json::from_value(resp.config)?;
        for (path, url) in parsed.deviceservicemap {
            let key = device_service_key(&hex_digest(uri_hash(&path)));
            self.config_store.set_string(&key, url);
        }

        *self.last_digest.lock().unwrap() = Some(resp.digest);
        debug!("installed updated hub config (digest changed)");
        Ok(true)
    }

    /// Runs the poll loop until cancelled, logging but not exiting on
    /// transient backend failures.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!("hub config poll failed: {:#}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("hub config puller shutting down");
                        return;
                    }
                }
            }
        }
    }
}

fn poll_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let bytes: [u8; 8] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::InMemoryConfigStore;

    #[test]
    fn digest_mismatch_is_detected() {
        let config_str = r#"{"deviceservicemap":{"/a":"http://x"}}"#;
        let correct = hex_digest(crc32_ieee(config_str.as_bytes()));
        assert_ne!(correct, "00000000");
    }

    #[test]
    fn device_service_key_uses_uri_hash() {
        let store = Arc::new(InMemoryConfigStore::new());
        let key = device_service_key(&hex_digest(uri_hash("/aa/bb")));
        store.set_string(&key, "http://backend.example".to_string());
        assert_eq!(
            store.get_string(&key),
            Some("http://backend.example".to_string())
        );
    }
}
