//! Simulated-user sessions and connection pooling
//!
//! Credentials are cached per partition of the simulated-user id with a TTL,
//! so total distinct credentials stay bounded and authentication cost is
//! amortized across workers. Connections are pooled per (partition,
//! protocol) with probabilistic forced close to emulate reconnect churn.

pub mod manager;
pub mod pool;

pub use manager::{AuthGrant, Authenticator, HttpAuthenticator, SessionManager};
pub use pool::{ConnectionPool, PooledConnection};

use std::time::{Duration, Instant};

/// One simulated user's credentials
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: u64,
    pub partition: u64,
    pub username: String,
    pub password: String,
    /// Bearer token presented on API requests
    pub token: String,
    /// Protocol-specific sub-credential, sent on mutating API calls
    pub csrf_token: Option<String>,
    pub expires_at: Instant,
}

impl Session {
    /// Whether the token can still be presented with at least `margin`
    /// of lifetime remaining. Tokens are never used past their expiry.
    pub fn is_usable(&self, margin: Duration) -> bool {
        Instant::now() + margin < self.expires_at
    }

    /// Credential-less session for operations that need none, such as the
    /// health probe.
    pub fn anonymous() -> Self {
        Self {
            user_id: 0,
            partition: 0,
            username: String::new(),
            password: String::new(),
            token: String::new(),
            csrf_token: None,
            expires_at: Instant::now() + Duration::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_usability_honors_margin() {
        let session = Session {
            user_id: 1,
            partition: 1,
            username: "loadtest-1@example.com".to_string(),
            password: "pw".to_string(),
            token: "tok".to_string(),
            csrf_token: None,
            expires_at: Instant::now() + Duration::from_secs(3),
        };
        assert!(session.is_usable(Duration::from_secs(1)));
        assert!(!session.is_usable(Duration::from_secs(10)));
    }
}
