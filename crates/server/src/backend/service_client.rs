//! Device service backend client
//!
//! POSTs `{id, method:"copost", deviceid, data:base64}`, expects `{id, code,
//! data:base64}`. This is the backend half of the device-to-server request
//! path: the session decodes a CoReq, resolves a backend URL by URI hash,
//! and calls `post` here to forward it.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct PostRequest<'a> {
    id: &'a str,
    method: &'a str,
    deviceid: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    #[allow(dead_code)]
    id: String,
    code: String,
    #[serde(default)]
    data: String,
}

/// Outcome of a device-service call, already collapsed to the three cases
/// the session's device→server request path needs to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServicePostOutcome {
    Ok(Vec<u8>),
    BadRequest,
    InternalServerError,
}

pub struct DeviceServiceClient {
    http: Client,
}

impl DeviceServiceClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    pub async fn post(&self, url: &str, device_id: &str, data: &[u8]) -> ServicePostOutcome {
        let request_id = short_id();
        let body = PostRequest {
            id: &request_id,
            method: "copost",
            deviceid: device_id,
            data: BASE64.encode(data),
        };

        let resp = match self.http.post(url).json(&body).send().await {
            Ok(resp) => resp,
            Err(_) => return ServicePostOutcome::InternalServerError,
        };

        let parsed = match resp.json::<PostResponse>().await {
            Ok(parsed) => parsed,
            Err(_) => return ServicePostOutcome::InternalServerError,
        };

        match parsed.code.as_str() {
            "OK" => match BASE64.decode(&parsed.data) {
                Ok(bytes) => ServicePostOutcome::Ok(bytes),
                Err(_) => ServicePostOutcome::InternalServerError,
            },
            "BAD_REQUEST" => ServicePostOutcome::BadRequest,
            _ => ServicePostOutcome::InternalServerError,
        }
    }
}

fn short_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let bytes: [u8; 8] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trips_through_outcome() {
        let encoded = BASE64.encode(b"pong");
        let decoded = BASE64.decode(&encoded).unwrap();
        assert_eq!(decoded, b"pong");
    }
}
