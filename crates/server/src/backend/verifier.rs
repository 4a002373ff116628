//! Device verifier backend client
//!
//! POSTs `{id, method:"verify", deviceid, devicesecret}`, expects `{id,
//! code}`. Enabled/disabled through the narrow config store's
//! `disable.deviceverify` key rather than a constructor flag, so a running
//! server can be flipped without restarting.

use common::ConfigStore;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    id: &'a str,
    method: &'a str,
    deviceid: &'a str,
    devicesecret: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[allow(dead_code)]
    id: String,
    code: String,
}

pub struct DeviceVerifierClient {
    http: Client,
    url: Option<String>,
    config_store: Arc<dyn ConfigStore>,
}

impl DeviceVerifierClient {
    pub fn new(http: Client, url: Option<String>, config_store: Arc<dyn ConfigStore>) -> Self {
        Self {
            http,
            url,
            config_store,
        }
    }

    fn disabled(&self) -> bool {
        self.config_store
            .get_bool_with_default("disable.deviceverify", false)
    }

    /// Returns `Ok(true)` if the device verified, `Ok(false)` if rejected,
    /// and `Err` for anything that should surface as `UnknownErr` to the
    /// device (transport failure or an unrecognised response code).
    pub async fn verify(&self, device_id: &str, device_secret: &str) -> anyhow::Result<bool> {
        if self.disabled() {
            return Ok(true);
        }

        let Some(url) = self.url.as_deref() else {
            anyhow::bail!("device verifier URL not configured");
        };

        let request_id = uuid_like_id();
        let body = VerifyRequest {
            id: &request_id,
            method: "verify",
            deviceid: device_id,
            devicesecret: device_secret,
        };

        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<VerifyResponse>()
            .await?;

        match resp.code.as_str() {
            "OK" => Ok(true),
            "VERIFICATION_FAILED" | "NOT_FOUND" => Ok(false),
            other => {
                warn!("device verifier returned unrecognised code: {}", other);
                anyhow::bail!("unrecognised verifier response code: {other}")
            }
        }
    }
}

/// A short opaque request id; the backend round-trips it but never
/// interprets it, so a random hex string is sufficient.
fn uuid_like_id() -> String {
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
    fn disabled_reads_through_config_store() {
        let store = Arc::new(InMemoryConfigStore::new());
        let client = DeviceVerifierClient::new(build_client(), None, store.clone());
        assert!(!client.disabled());

        store.set_bool("disable.deviceverify", true);
        assert!(client.disabled());
    }

    fn build_client() -> Client {
        Client::builder().build().unwrap()
    }
}
