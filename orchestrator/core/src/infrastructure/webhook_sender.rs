// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Signed webhook delivery over HTTP.
//!
//! The body is serialized once and, when the registration carries a secret,
//! signed with HMAC-SHA256 over those exact bytes:
//! `X-Brain-Signature: sha256=<hex>`.

use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::time::Duration;

use crate::domain::webhook::{DeliveryStatus, WebhookRegistration, SIGNATURE_HEADER};

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_HEADER: &str = "X-Brain-Event";

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub status: DeliveryStatus,
    pub http_status: Option<u16>,
    pub error: Option<String>,
}

pub fn sign_payload(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

pub struct HttpWebhookSender {
    client: Client,
    timeout: Duration,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    pub async fn deliver(
        &self,
        registration: &WebhookRegistration,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> DeliveryOutcome {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                return DeliveryOutcome {
                    status: DeliveryStatus::Failed,
                    http_status: None,
                    error: Some(format!("failed to serialize payload: {}", e)),
                }
            }
        };

        let mut request = self
            .client
            .post(&registration.url)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(EVENT_HEADER, event_type);
        for (name, value) in &registration.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(signature) = registration
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .and_then(|secret| sign_payload(secret, &body))
        {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        match request.body(body).send().await {
            Ok(response) if response.status().is_success() => DeliveryOutcome {
                status: DeliveryStatus::Delivered,
                http_status: Some(response.status().as_u16()),
                error: None,
            },
            Ok(response) => {
                let code = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                DeliveryOutcome {
                    status: DeliveryStatus::Failed,
                    http_status: Some(code),
                    error: Some(if text.is_empty() {
                        format!("webhook responded with HTTP {}", code)
                    } else {
                        text
                    }),
                }
            }
            Err(e) => DeliveryOutcome {
                status: DeliveryStatus::Failed,
                http_status: None,
                error: Some(if e.is_timeout() {
                    format!("webhook timed out after {:?}", self.timeout)
                } else {
                    e.to_string()
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::ExecutionId;
    use serde_json::json;

    #[test]
    fn test_signature_is_stable_hex() {
        let a = sign_payload("secret", br#"{"a":1}"#).unwrap();
        let b = sign_payload("secret", br#"{"a":1}"#).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("sha256="));
        assert_eq!(a.len(), "sha256=".len() + 64);
        assert_ne!(a, sign_payload("other", br#"{"a":1}"#).unwrap());
    }

    #[tokio::test]
    async fn test_delivers_signed_body() {
        let payload = json!({"event": "execution.completed", "execution_id": "exec-1"});
        let body = serde_json::to_vec(&payload).unwrap();

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header(SIGNATURE_HEADER, sign_payload("s3cret", &body).unwrap().as_str())
            .match_header(EVENT_HEADER, "execution.completed")
            .match_header("x-tenant", "acme")
            .with_status(204)
            .create_async()
            .await;

        let registration = WebhookRegistration::new(ExecutionId::from("exec-1"), format!("{}/hook", server.url()))
            .with_secret("s3cret")
            .with_header("X-Tenant", "acme");
        let outcome = HttpWebhookSender::new(Duration::from_secs(2))
            .deliver(&registration, "execution.completed", &payload)
            .await;

        assert_eq!(outcome.status, DeliveryStatus::Delivered);
        assert_eq!(outcome.http_status, Some(204));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_delivery_records_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(500)
            .with_body("nope")
            .create_async()
            .await;

        let registration = WebhookRegistration::new(ExecutionId::from("exec-1"), format!("{}/hook", server.url()));
        let outcome = HttpWebhookSender::new(Duration::from_secs(2))
            .deliver(&registration, "execution.failed", &json!({}))
            .await;

        assert_eq!(outcome.status, DeliveryStatus::Failed);
        assert_eq!(outcome.http_status, Some(500));
        assert_eq!(outcome.error.as_deref(), Some("nope"));
    }
}
