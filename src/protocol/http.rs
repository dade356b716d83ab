//! HTTP API adapter
//!
//! Request/response client for the platform's message API. Credentials ride
//! on every request (bearer token, CSRF header on mutations), so
//! `authenticate` is a no-op at the connection level. Status classification:
//! 4xx client, 5xx server, with a contention subtype detected from the
//! response body for the database-facing scenarios.

use async_trait::async_trait;
use tracing::debug;

use crate::config::TargetConfig;
use crate::error::{MailstormError, Result};
use crate::protocol::{
    ActionOutcome, ActionParams, ProtocolAdapter, ProtocolConnection, ProtocolKind,
};
use crate::session::Session;

/// Connection factory for the HTTP API
pub struct HttpApiAdapter {
    base_url: String,
}

impl HttpApiAdapter {
    pub fn new(target: &TargetConfig) -> Self {
        Self {
            base_url: target.api_url.clone(),
        }
    }
}

#[async_trait]
impl ProtocolAdapter for HttpApiAdapter {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Api
    }

    async fn connect(&self) -> Result<Box<dyn ProtocolConnection>> {
        // one client per pooled entry so forced-close churn actually
        // discards the underlying keep-alive connections
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| MailstormError::ConnectionError {
                target: "api".to_string(),
                message: e.to_string(),
                source: Some(Box::new(e)),
            })?;
        debug!(base_url = %self.base_url, "api client created");
        Ok(Box::new(HttpConnection {
            client,
            base_url: self.base_url.clone(),
            broken: false,
        }))
    }
}

struct HttpConnection {
    client: reqwest::Client,
    base_url: String,
    broken: bool,
}

impl HttpConnection {
    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        session: &Session,
        mutating: bool,
    ) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&session.token);
        if mutating {
            if let Some(csrf) = &session.csrf_token {
                builder = builder.header("X-CSRF-Token", csrf);
            }
        }
        builder
    }

    async fn execute(
        &mut self,
        builder: reqwest::RequestBuilder,
        operation: &str,
        bytes_sent: u64,
    ) -> Result<ActionOutcome> {
        let response = builder.send().await.map_err(|e| {
            self.broken = true;
            MailstormError::ConnectionError {
                target: "api".to_string(),
                message: e.to_string(),
                source: Some(Box::new(e)),
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if (200..300).contains(&status) {
            return Ok(ActionOutcome {
                bytes_sent,
                bytes_received: body.len() as u64,
            });
        }
        Err(classify_response(operation, status, &body))
    }
}

/// Map a non-2xx API response into the failure taxonomy
fn classify_response(operation: &str, status: u16, body: &str) -> MailstormError {
    if let Some(err) = detect_contention(operation, body) {
        return err;
    }
    let message = format!("status {status}: {}", truncate(body, 200));
    if (400..500).contains(&status) {
        MailstormError::ClientError {
            operation: operation.to_string(),
            message,
        }
    } else {
        MailstormError::ServerError {
            operation: operation.to_string(),
            message,
        }
    }
}

/// Contention detection. A structured `error_code` field is authoritative
/// when present; the body substring match is a fallback for opaque error
/// bodies and is known to be fragile.
fn detect_contention(operation: &str, body: &str) -> Option<MailstormError> {
    let structured = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error_code")
                .and_then(|c| c.as_str())
                .map(|c| c == "deadlock_detected")
        })
        .unwrap_or(false);
    if structured || body.to_lowercase().contains("deadlock") {
        return Some(MailstormError::ContentionError {
            operation: operation.to_string(),
            message: truncate(body, 200).to_string(),
        });
    }
    None
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl ProtocolConnection for HttpConnection {
    async fn authenticate(&mut self, _session: &Session) -> Result<()> {
        // bearer token travels on each request
        Ok(())
    }

    async fn perform(&mut self, params: &ActionParams, session: &Session) -> Result<ActionOutcome> {
        let operation = params.operation();
        match params {
            ActionParams::ListMessages { page, page_size } => {
                let path = format!("/api/v1/messages?page={page}&page_size={page_size}");
                let builder = self.request(reqwest::Method::GET, &path, session, false);
                self.execute(builder, operation, 0).await
            }
            ActionParams::FetchMessage { message_id } => {
                let path = format!("/api/v1/messages/{message_id}");
                let builder = self.request(reqwest::Method::GET, &path, session, false);
                self.execute(builder, operation, 0).await
            }
            ActionParams::SearchMessages { query } => {
                let path = format!("/api/v1/messages/search?q={query}");
                let builder = self.request(reqwest::Method::GET, &path, session, false);
                self.execute(builder, operation, 0).await
            }
            ActionParams::SendMessage {
                from,
                to,
                subject,
                body,
            } => {
                let payload = serde_json::json!({
                    "from": from,
                    "to": to,
                    "subject": subject,
                    "body": body,
                });
                let bytes_sent = payload.to_string().len() as u64;
                let builder = self
                    .request(reqwest::Method::POST, "/api/v1/messages", session, true)
                    .json(&payload);
                self.execute(builder, operation, bytes_sent).await
            }
            ActionParams::MarkMessage { message_id, flag } => {
                let path = format!("/api/v1/messages/{message_id}/flags");
                let payload = serde_json::json!({ "flag": flag });
                let builder = self
                    .request(reqwest::Method::POST, &path, session, true)
                    .json(&payload);
                self.execute(builder, operation, payload.to_string().len() as u64)
                    .await
            }
            ActionParams::DeleteMessage { message_id } => {
                let path = format!("/api/v1/messages/{message_id}");
                let builder = self.request(reqwest::Method::DELETE, &path, session, true);
                self.execute(builder, operation, 0).await
            }
            ActionParams::HealthProbe => {
                let url = format!("{}/health", self.base_url);
                let builder = self.client.get(url);
                self.execute(builder, operation, 0).await
            }
            other => Err(MailstormError::InternalError {
                message: format!("operation {} is not routable to the API", other.operation()),
                component: Some("http".to_string()),
            }),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        // dropping the client tears down its keep-alive pool
        Ok(())
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn test_status_classification() {
        let err = classify_response("fetch_message", 404, "not found");
        assert_eq!(err.failure_kind(), FailureKind::Client);

        let err = classify_response("list_messages", 503, "unavailable");
        assert_eq!(err.failure_kind(), FailureKind::Server);
    }

    #[test]
    fn test_contention_from_structured_code() {
        let body = r#"{"error_code":"deadlock_detected","message":"tx aborted"}"#;
        let err = classify_response("mark_message", 500, body);
        assert_eq!(err.failure_kind(), FailureKind::Contention);
    }

    #[test]
    fn test_contention_from_opaque_body() {
        let err = classify_response("delete_message", 500, "Deadlock found when trying to get lock");
        assert_eq!(err.failure_kind(), FailureKind::Contention);
    }

    #[test]
    fn test_plain_server_error_is_not_contention() {
        let err = classify_response("send_message", 500, "internal error");
        assert_eq!(err.failure_kind(), FailureKind::Server);
    }
}
