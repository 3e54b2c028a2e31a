//! Live-feed adapter: pushes channel-B payloads to the feed relay over HTTP.
//!
//! The relay fans payloads out to connected web clients; this crate only does
//! `POST {base}/users/{id}/notifications` with the JSON payload.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use hdn_core::{
    domain::UserId, errors::Error, formatting::join_url, payload::NotificationPayload,
    ports::PayloadSink, Result,
};

const CHANNEL: &str = "feed";

#[derive(Clone, Debug)]
pub struct HttpFeedSink {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl HttpFeedSink {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("feed http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            token,
            http,
        })
    }

    pub fn endpoint(&self, user_id: UserId) -> String {
        join_url(&self.base_url, &format!("users/{user_id}/notifications"))
    }
}

fn map_err(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        return Error::Timeout { channel: CHANNEL };
    }
    Error::delivery(CHANNEL, format!("request error: {e}"))
}

fn rejected(status: reqwest::StatusCode, body: &str) -> Error {
    Error::delivery(
        CHANNEL,
        format!(
            "relay rejected payload: {status} {}",
            body.chars().take(200).collect::<String>()
        ),
    )
}

#[async_trait]
impl PayloadSink for HttpFeedSink {
    fn name(&self) -> &'static str {
        CHANNEL
    }

    async fn push_payload(&self, user_id: UserId, payload: &NotificationPayload) -> Result<()> {
        let mut req = self.http.post(self.endpoint(user_id)).json(payload);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(map_err)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(rejected(status, &body));
        }

        debug!(recipient = %user_id, event_id = %payload.event_id, "feed payload pushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_per_user_endpoint() {
        let sink = HttpFeedSink::new("http://relay:9000/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            sink.endpoint(UserId(7)),
            "http://relay:9000/users/7/notifications"
        );
    }

    #[test]
    fn rejection_keeps_status_and_truncates_body() {
        let body = "x".repeat(500);
        let err = rejected(reqwest::StatusCode::BAD_GATEWAY, &body);
        let msg = err.to_string();
        assert!(msg.starts_with("feed delivery failed: relay rejected payload: 502"));
        assert!(msg.len() < 300);
    }

    #[tokio::test]
    async fn unreachable_relay_is_a_delivery_error() {
        let sink = HttpFeedSink::new("http://127.0.0.1:9", None, Duration::from_secs(2)).unwrap();
        let payload = NotificationPayload {
            event_id: uuid::Uuid::nil(),
            kind: hdn_core::payload::PAYLOAD_KIND.to_string(),
            is_read: false,
            actor: hdn_core::payload::PayloadActor {
                name: "Ann".into(),
                avatar: None,
            },
            message: "m".into(),
            changes: Vec::new(),
            links: hdn_core::payload::Links {
                primary: "p".into(),
                attachment: None,
            },
            created_at: chrono::DateTime::<chrono::Utc>::default(),
        };
        let err = sink.push_payload(UserId(1), &payload).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Delivery { channel: "feed", .. } | Error::Timeout { channel: "feed" }
        ));
    }
}
