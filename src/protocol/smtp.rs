//! Submission protocol adapter (SMTP dialect)
//!
//! Drives the standard submission dialogue: greeting, EHLO, AUTH PLAIN,
//! MAIL FROM / RCPT TO / DATA, QUIT. Reply codes are classified per the
//! harness failure taxonomy: 4xx as client errors, 5xx as server errors.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::net::TcpStream;
use tracing::debug;
use uuid::Uuid;

use crate::config::TargetConfig;
use crate::error::{MailstormError, Result};
use crate::protocol::{
    ActionOutcome, ActionParams, LineStream, ProtocolAdapter, ProtocolConnection, ProtocolKind,
};
use crate::session::Session;

const TARGET: &str = "submission";

/// Connection factory for the submission protocol
pub struct SmtpAdapter {
    host: String,
    port: u16,
}

impl SmtpAdapter {
    pub fn new(target: &TargetConfig) -> Self {
        Self {
            host: target.smtp_host.clone(),
            port: target.smtp_port,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for SmtpAdapter {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Submission
    }

    async fn connect(&self) -> Result<Box<dyn ProtocolConnection>> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| MailstormError::connection(TARGET, e))?;
        let mut conn = SmtpConnection {
            line: LineStream::new(stream, TARGET),
            broken: false,
        };

        let (code, _) = conn.read_reply().await?;
        expect_code(code, 220, "greeting")?;

        conn.line.write_line("EHLO mailstorm").await?;
        let (code, _) = conn.read_reply().await?;
        expect_code(code, 250, "EHLO")?;

        debug!(host = %self.host, port = self.port, "submission connection established");
        Ok(Box::new(conn))
    }
}

struct SmtpConnection {
    line: LineStream,
    broken: bool,
}

impl SmtpConnection {
    /// Read a full (possibly multi-line) reply, returning the status code
    /// and the final line's text.
    async fn read_reply(&mut self) -> Result<(u16, String)> {
        loop {
            let line = match self.line.read_line().await {
                Ok(line) => line,
                Err(e) => {
                    self.broken = true;
                    return Err(e);
                }
            };
            if line.len() < 3 {
                self.broken = true;
                return Err(MailstormError::ProtocolError {
                    target: TARGET.to_string(),
                    message: format!("short reply line: {line:?}"),
                });
            }
            let code: u16 =
                line[..3]
                    .parse()
                    .map_err(|_| MailstormError::ProtocolError {
                        target: TARGET.to_string(),
                        message: format!("unparseable reply code: {line:?}"),
                    })?;
            // continuation lines carry '-' after the code
            if line.as_bytes().get(3) == Some(&b'-') {
                continue;
            }
            return Ok((code, line[3..].trim().to_string()));
        }
    }

    async fn command(&mut self, command: &str, expected: u16) -> Result<u64> {
        let sent = match self.line.write_line(command).await {
            Ok(n) => n,
            Err(e) => {
                self.broken = true;
                return Err(e);
            }
        };
        let (code, text) = self.read_reply().await?;
        expect_code(code, expected, &text)?;
        Ok(sent)
    }
}

/// Classify an unexpected reply code into the failure taxonomy
fn expect_code(code: u16, expected: u16, detail: &str) -> Result<()> {
    if code == expected {
        return Ok(());
    }
    let message = format!("expected {expected}, got {code}: {detail}");
    if (400..500).contains(&code) {
        Err(MailstormError::ClientError {
            operation: "submission".to_string(),
            message,
        })
    } else {
        Err(MailstormError::ServerError {
            operation: "submission".to_string(),
            message,
        })
    }
}

#[async_trait]
impl ProtocolConnection for SmtpConnection {
    async fn authenticate(&mut self, session: &Session) -> Result<()> {
        let blob = BASE64.encode(format!(
            "\0{}\0{}",
            session.username, session.password
        ));
        self.command(&format!("AUTH PLAIN {blob}"), 235)
            .await
            .map_err(|e| match e {
                // a rejected AUTH is an auth failure, not a generic client error
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
            ActionParams::SendMessage {
                from,
                to,
                subject,
                body,
            } => {
                let mut sent = 0u64;
                sent += self.command(&format!("MAIL FROM:<{from}>"), 250).await?;
                for recipient in to {
                    sent += self.command(&format!("RCPT TO:<{recipient}>"), 250).await?;
                }

                self.line.write_line("DATA").await?;
                let (code, text) = self.read_reply().await?;
                expect_code(code, 354, &text)?;

                sent += self
                    .line
                    .write_line(&format!("From: <{from}>"))
                    .await?;
                sent += self
                    .line
                    .write_line(&format!("To: <{}>", to.join(">, <")))
                    .await?;
                sent += self.line.write_line(&format!("Subject: {subject}")).await?;
                sent += self
                    .line
                    .write_line(&format!("Message-ID: <{}@mailstorm>", Uuid::new_v4()))
                    .await?;
                sent += self.line.write_line("").await?;
                for raw in body.lines() {
                    // dot-stuffing per the protocol's data phase
                    if let Some(rest) = raw.strip_prefix('.') {
                        sent += self.line.write_line(&format!("..{rest}")).await?;
                    } else {
                        sent += self.line.write_line(raw).await?;
                    }
                }
                sent += self.line.write_line(".").await?;
                let (code, text) = self.read_reply().await?;
                expect_code(code, 250, &text)?;

                Ok(ActionOutcome {
                    bytes_sent: sent,
                    bytes_received: 0,
                })
            }
            other => Err(MailstormError::InternalError {
                message: format!(
                    "operation {} is not routable to the submission protocol",
                    other.operation()
                ),
                component: Some("smtp".to_string()),
            }),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.broken {
            // best-effort polite close
            let _ = self.line.write_line("QUIT").await;
            let _ = self.read_reply().await;
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
    fn test_reply_code_classification() {
        assert!(expect_code(250, 250, "ok").is_ok());
        assert!(matches!(
            expect_code(451, 250, "try later"),
            Err(MailstormError::ClientError { .. })
        ));
        assert!(matches!(
            expect_code(554, 250, "rejected"),
            Err(MailstormError::ServerError { .. })
        ));
    }
}
