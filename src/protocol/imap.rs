//! Retrieval protocol adapter (IMAP dialect)
//!
//! Tagged command client covering the retrieval workflows: LOGIN, SELECT,
//! FETCH, a short IDLE window, LOGOUT. A tagged NO is classified as a client
//! error (the operation was refused), a tagged BAD as a server error (the
//! exchange itself broke down).

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::TargetConfig;
use crate::error::{MailstormError, Result};
use crate::protocol::{
    ActionOutcome, ActionParams, LineStream, ProtocolAdapter, ProtocolConnection, ProtocolKind,
};
use crate::session::Session;

const TARGET: &str = "retrieval";

/// Connection factory for the retrieval protocol
pub struct ImapAdapter {
    host: String,
    port: u16,
}

impl ImapAdapter {
    pub fn new(target: &TargetConfig) -> Self {
        Self {
            host: target.imap_host.clone(),
            port: target.imap_port,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for ImapAdapter {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Retrieval
    }

    async fn connect(&self) -> Result<Box<dyn ProtocolConnection>> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| MailstormError::connection(TARGET, e))?;
        let mut conn = ImapConnection {
            line: LineStream::new(stream, TARGET),
            broken: false,
            tag_seq: 0,
            selected: None,
        };

        let greeting = conn.line.read_line().await?;
        if !greeting.starts_with("* OK") {
            return Err(MailstormError::ProtocolError {
                target: TARGET.to_string(),
                message: format!("unexpected greeting: {greeting}"),
            });
        }

        debug!(host = %self.host, port = self.port, "retrieval connection established");
        Ok(Box::new(conn))
    }
}

struct ImapConnection {
    line: LineStream,
    broken: bool,
    tag_seq: u64,
    /// Mailbox currently selected on this connection, if any
    selected: Option<String>,
}

/// Final status of a tagged command
#[derive(Debug, PartialEq)]
enum TaggedStatus {
    Ok,
    No,
    Bad,
}

impl ImapConnection {
    fn next_tag(&mut self) -> String {
        self.tag_seq += 1;
        format!("a{:04}", self.tag_seq)
    }

    /// Send one tagged command and consume untagged responses until the
    /// tagged completion arrives.
    async fn command(&mut self, command: &str) -> Result<(TaggedStatus, String, u64)> {
        let tag = self.next_tag();
        let sent = match self.line.write_line(&format!("{tag} {command}")).await {
            Ok(n) => n,
            Err(e) => {
                self.broken = true;
                return Err(e);
            }
        };
        let mut received = sent;
        loop {
            let line = match self.line.read_line().await {
                Ok(line) => line,
                Err(e) => {
                    self.broken = true;
                    return Err(e);
                }
            };
            received += line.len() as u64;
            if let Some(rest) = line.strip_prefix(&format!("{tag} ")) {
                let (status, text) = parse_tagged(rest);
                return Ok((status, text, received));
            }
            // untagged data line, keep draining
        }
    }

    async fn checked(&mut self, command: &str, operation: &str) -> Result<u64> {
        let (status, text, bytes) = self.command(command).await?;
        match status {
            TaggedStatus::Ok => Ok(bytes),
            TaggedStatus::No => Err(MailstormError::ClientError {
                operation: operation.to_string(),
                message: text,
            }),
            TaggedStatus::Bad => Err(MailstormError::ServerError {
                operation: operation.to_string(),
                message: text,
            }),
        }
    }

    async fn select(&mut self, mailbox: &str, operation: &str) -> Result<u64> {
        if self.selected.as_deref() == Some(mailbox) {
            return Ok(0);
        }
        let bytes = self.checked(&format!("SELECT {mailbox}"), operation).await?;
        self.selected = Some(mailbox.to_string());
        Ok(bytes)
    }

    /// Enter IDLE, hold it for `wait`, then terminate with DONE
    async fn idle(&mut self, wait: Duration) -> Result<u64> {
        let tag = self.next_tag();
        let mut bytes = self.line.write_line(&format!("{tag} IDLE")).await?;
        let cont = self.line.read_line().await?;
        if !cont.starts_with('+') {
            self.broken = true;
            return Err(MailstormError::ProtocolError {
                target: TARGET.to_string(),
                message: format!("expected idle continuation, got: {cont}"),
            });
        }
        tokio::time::sleep(wait).await;
        bytes += self.line.write_line("DONE").await?;
        loop {
            let line = self.line.read_line().await?;
            bytes += line.len() as u64;
            if let Some(rest) = line.strip_prefix(&format!("{tag} ")) {
                let (status, text) = parse_tagged(rest);
                if status == TaggedStatus::Ok {
                    return Ok(bytes);
                }
                return Err(MailstormError::ServerError {
                    operation: "idle_mailbox".to_string(),
                    message: text,
                });
            }
        }
    }
}

fn parse_tagged(rest: &str) -> (TaggedStatus, String) {
    let mut parts = rest.splitn(2, ' ');
    let status = match parts.next().unwrap_or_default() {
        "OK" => TaggedStatus::Ok,
        "NO" => TaggedStatus::No,
        _ => TaggedStatus::Bad,
    };
    (status, parts.next().unwrap_or_default().to_string())
}

#[async_trait]
impl ProtocolConnection for ImapConnection {
    async fn authenticate(&mut self, session: &Session) -> Result<()> {
        let command = format!("LOGIN \"{}\" \"{}\"", session.username, session.password);
        self.checked(&command, "login").await.map_err(|e| match e {
            MailstormError::ClientError { message, .. }
            | MailstormError::ServerError { message, .. } => MailstormError::AuthFailure {
                username: session.username.clone(),
                message,
            },
            other => other,
        })?;
        Ok(())
    }

    async fn perform(&mut self, params: &ActionParams, _session: &Session) -> Result<ActionOutcome> {
        match params {
            ActionParams::FetchMailbox { mailbox, batch } => {
                let mut received = self.select(mailbox, "fetch_mailbox").await?;
                received += self
                    .checked(
                        &format!("FETCH 1:{batch} (FLAGS INTERNALDATE RFC822.SIZE)"),
                        "fetch_mailbox",
                    )
                    .await?;
                Ok(ActionOutcome {
                    bytes_sent: 0,
                    bytes_received: received,
                })
            }
            ActionParams::IdleMailbox { mailbox, wait } => {
                let mut received = self.select(mailbox, "idle_mailbox").await?;
                received += self.idle(*wait).await?;
                Ok(ActionOutcome {
                    bytes_sent: 0,
                    bytes_received: received,
                })
            }
            other => Err(MailstormError::InternalError {
                message: format!(
                    "operation {} is not routable to the retrieval protocol",
                    other.operation()
                ),
                component: Some("imap".to_string()),
            }),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.broken {
            let _ = self.command("LOGOUT").await;
        }
        self.line.shutdown().await
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_responses() {
        let (status, text) = parse_tagged("OK FETCH completed");
        assert_eq!(status, TaggedStatus::Ok);
        assert_eq!(text, "FETCH completed");

        let (status, _) = parse_tagged("NO mailbox does not exist");
        assert_eq!(status, TaggedStatus::No);

        let (status, _) = parse_tagged("BAD unknown command");
        assert_eq!(status, TaggedStatus::Bad);
    }
}
