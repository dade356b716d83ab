//! Protocol adapters for the platform under test
//!
//! A uniform operation surface (connect, authenticate, perform-action,
//! disconnect) wraps three distinct transports: the submission protocol
//! (SMTP dialect), the retrieval protocol (IMAP dialect), and the HTTP API.
//! Every operation is timed start-to-finish through [`timed_operation`],
//! which emits exactly one duration sample tagged with the operation kind
//! plus a success/failure counter increment.

pub mod http;
pub mod imap;
pub mod smtp;

pub use http::HttpApiAdapter;
pub use imap::ImapAdapter;
pub use smtp::SmtpAdapter;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{FailureKind, MailstormError, Result};
use crate::metrics::MetricsCollector;
use crate::session::Session;

/// The three transports the harness can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ProtocolKind {
    Submission,
    Retrieval,
    Api,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Submission => "submission",
            ProtocolKind::Retrieval => "retrieval",
            ProtocolKind::Api => "api",
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which protocol mix an invocation drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TargetSelector {
    Submission,
    Retrieval,
    Api,
    All,
}

impl TargetSelector {
    pub fn includes(&self, kind: ProtocolKind) -> bool {
        match self {
            TargetSelector::All => true,
            TargetSelector::Submission => kind == ProtocolKind::Submission,
            TargetSelector::Retrieval => kind == ProtocolKind::Retrieval,
            TargetSelector::Api => kind == ProtocolKind::Api,
        }
    }

    pub fn kinds(&self) -> Vec<ProtocolKind> {
        match self {
            TargetSelector::All => vec![
                ProtocolKind::Submission,
                ProtocolKind::Retrieval,
                ProtocolKind::Api,
            ],
            TargetSelector::Submission => vec![ProtocolKind::Submission],
            TargetSelector::Retrieval => vec![ProtocolKind::Retrieval],
            TargetSelector::Api => vec![ProtocolKind::Api],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetSelector::Submission => "submission",
            TargetSelector::Retrieval => "retrieval",
            TargetSelector::Api => "api",
            TargetSelector::All => "all",
        }
    }
}

impl std::fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete parameters for one workflow operation, produced by a payload
/// generator from (simulated-user-id, iteration-number).
#[derive(Debug, Clone)]
pub enum ActionParams {
    SendMessage {
        from: String,
        to: Vec<String>,
        subject: String,
        body: String,
    },
    FetchMailbox {
        mailbox: String,
        batch: u32,
    },
    IdleMailbox {
        mailbox: String,
        wait: Duration,
    },
    ListMessages {
        page: u32,
        page_size: u32,
    },
    FetchMessage {
        message_id: String,
    },
    SearchMessages {
        query: String,
    },
    MarkMessage {
        message_id: String,
        flag: String,
    },
    DeleteMessage {
        message_id: String,
    },
    HealthProbe,
}

impl ActionParams {
    /// Stable operation name used in metric sample tags
    pub fn operation(&self) -> &'static str {
        match self {
            ActionParams::SendMessage { .. } => "send_message",
            ActionParams::FetchMailbox { .. } => "fetch_mailbox",
            ActionParams::IdleMailbox { .. } => "idle_mailbox",
            ActionParams::ListMessages { .. } => "list_messages",
            ActionParams::FetchMessage { .. } => "fetch_message",
            ActionParams::SearchMessages { .. } => "search_messages",
            ActionParams::MarkMessage { .. } => "mark_message",
            ActionParams::DeleteMessage { .. } => "delete_message",
            ActionParams::HealthProbe => "health_probe",
        }
    }
}

/// What an operation moved over the wire, for throughput accounting
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionOutcome {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// One live protocol connection owned by a single worker while in use,
/// parked in the shared pool between iterations
#[async_trait]
pub trait ProtocolConnection: Send + Sync {
    /// Present credentials on transports that require it; a no-op on
    /// transports whose requests carry credentials inline.
    async fn authenticate(&mut self, session: &Session) -> Result<()>;

    /// Execute one operation against the target
    async fn perform(&mut self, params: &ActionParams, session: &Session) -> Result<ActionOutcome>;

    /// Close the connection politely
    async fn disconnect(&mut self) -> Result<()>;

    /// Whether a prior operation left this connection unusable
    fn is_broken(&self) -> bool;
}

/// Factory for connections to one transport
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    async fn connect(&self) -> Result<Box<dyn ProtocolConnection>>;
}

/// Time one protocol operation start-to-finish under a bounded timeout.
///
/// Emits exactly one duration sample named `{target}.{operation}` and one
/// outcome counter increment; failures additionally bump the counter for
/// their classified failure kind. Timeout expiry is its own category.
pub async fn timed_operation<T, F>(
    metrics: &MetricsCollector,
    kind: ProtocolKind,
    operation: &str,
    limit: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let name = format!("{}.{}", kind.as_str(), operation);
    let start = Instant::now();
    let result = tokio::time::timeout(limit, fut).await;
    let elapsed = start.elapsed();

    let mut tags = BTreeMap::new();
    tags.insert("target".to_string(), kind.as_str().to_string());
    tags.insert("operation".to_string(), operation.to_string());
    metrics.record_duration(name.as_str(), elapsed, tags);

    match result {
        Ok(Ok(value)) => {
            metrics.increment(&format!("{name}.success"));
            Ok(value)
        }
        Ok(Err(err)) => {
            metrics.increment(&format!("{name}.failure"));
            metrics.increment(&format!("{name}.{}", err.failure_kind().as_str()));
            Err(err)
        }
        Err(_) => {
            metrics.increment(&format!("{name}.failure"));
            metrics.increment(&format!("{name}.{}", FailureKind::Timeout.as_str()));
            Err(MailstormError::OperationTimeout {
                operation: name,
                limit,
            })
        }
    }
}

/// Buffered line transport shared by the SMTP and IMAP clients.
/// Lines are CRLF-terminated on the wire; the terminator is stripped on read.
pub(crate) struct LineStream {
    stream: TcpStream,
    buf: BytesMut,
    target: &'static str,
}

impl LineStream {
    pub(crate) fn new(stream: TcpStream, target: &'static str) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(4096),
            target,
        }
    }

    /// Read one line, waiting for more bytes as needed
    pub(crate) async fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line = self.buf.split_to(pos + 1);
                let text = String::from_utf8_lossy(&line);
                return Ok(text.trim_end_matches(['\r', '\n']).to_string());
            }
            let n = self
                .stream
                .read_buf(&mut self.buf)
                .await
                .map_err(|e| MailstormError::connection(self.target, e))?;
            if n == 0 {
                return Err(MailstormError::ConnectionError {
                    target: self.target.to_string(),
                    message: "connection closed by peer".to_string(),
                    source: None,
                });
            }
        }
    }

    /// Write one CRLF-terminated line, returning bytes written
    pub(crate) async fn write_line(&mut self, line: &str) -> Result<u64> {
        self.stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| MailstormError::connection(self.target, e))?;
        self.stream
            .write_all(b"\r\n")
            .await
            .map_err(|e| MailstormError::connection(self.target, e))?;
        Ok(line.len() as u64 + 2)
    }

    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| MailstormError::connection(self.target, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_selector_includes() {
        assert!(TargetSelector::All.includes(ProtocolKind::Submission));
        assert!(TargetSelector::Api.includes(ProtocolKind::Api));
        assert!(!TargetSelector::Api.includes(ProtocolKind::Retrieval));
        assert_eq!(TargetSelector::All.kinds().len(), 3);
    }

    #[test]
    fn test_operation_names_are_stable() {
        let params = ActionParams::SendMessage {
            from: "a@x".to_string(),
            to: vec!["b@x".to_string()],
            subject: "s".to_string(),
            body: "b".to_string(),
        };
        assert_eq!(params.operation(), "send_message");
        assert_eq!(ActionParams::HealthProbe.operation(), "health_probe");
    }

    #[tokio::test]
    async fn test_timed_operation_records_one_sample_per_call() {
        let metrics = MetricsCollector::new();

        let ok: Result<u32> = Ok(7);
        let value = timed_operation(
            &metrics,
            ProtocolKind::Api,
            "list_messages",
            Duration::from_secs(1),
            async move { ok },
        )
        .await
        .unwrap();
        assert_eq!(value, 7);

        let err: Result<u32> = Err(MailstormError::ServerError {
            operation: "list_messages".to_string(),
            message: "boom".to_string(),
        });
        let _ = timed_operation(
            &metrics,
            ProtocolKind::Api,
            "list_messages",
            Duration::from_secs(1),
            async move { err },
        )
        .await;

        assert_eq!(metrics.sample_count(), 2);
        assert_eq!(metrics.counter("api.list_messages.success"), 1);
        assert_eq!(metrics.counter("api.list_messages.failure"), 1);
        assert_eq!(metrics.counter("api.list_messages.server_error"), 1);
    }

    #[tokio::test]
    async fn test_timed_operation_classifies_timeouts() {
        let metrics = MetricsCollector::new();
        let result: Result<()> = timed_operation(
            &metrics,
            ProtocolKind::Submission,
            "send_message",
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(MailstormError::OperationTimeout { .. })
        ));
        assert_eq!(metrics.counter("submission.send_message.timed_out"), 1);
        assert_eq!(metrics.sample_count(), 1);
    }
}
