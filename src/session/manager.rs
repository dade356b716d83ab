//! Session manager: per-partition credential cache with TTL
//!
//! The cache is read-mostly shared state; TTL expiry is its only
//! invalidation. Two workers hitting a cold partition concurrently may both
//! authenticate, in which case the later grant wins rather than serializing
//! authentication per partition.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{MailstormError, Result};
use crate::metrics::MetricsCollector;
use crate::session::Session;

/// A successful authentication round-trip result
#[derive(Debug, Clone)]
pub struct AuthGrant {
    pub token: String,
    pub csrf_token: Option<String>,
    pub expires_in: Duration,
}

/// Authentication round-trip against the target's auth endpoint.
/// Injectable so tests can script grants and failures.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthGrant>;
}

/// Issues and caches per-simulated-user credentials
pub struct SessionManager {
    authenticator: Arc<dyn Authenticator>,
    cache: DashMap<u64, Session>,
    metrics: Arc<MetricsCollector>,
    partitions: u64,
    token_ttl: Duration,
    refresh_margin: Duration,
    password: String,
    mail_domain: String,
}

impl SessionManager {
    pub fn new(
        config: &Config,
        authenticator: Arc<dyn Authenticator>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            authenticator,
            cache: DashMap::new(),
            metrics,
            partitions: config.session.partitions,
            token_ttl: config.session.token_ttl,
            refresh_margin: config.session.refresh_margin,
            password: config.session.password.clone(),
            mail_domain: config.target.mail_domain.clone(),
        }
    }

    /// Return a usable session for the simulated user, authenticating if the
    /// partition's cached token is missing or too close to expiry. An
    /// `AuthFailure` is a per-iteration failure for the caller, never a
    /// run-level abort.
    pub async fn get_session(&self, user_id: u64) -> Result<Session> {
        let partition = user_id % self.partitions;

        if let Some(cached) = self.cache.get(&partition) {
            if cached.is_usable(self.refresh_margin) {
                let mut session = cached.clone();
                session.user_id = user_id;
                return Ok(session);
            }
        }

        let username = format!("loadtest-{partition}@{}", self.mail_domain);
        let start = Instant::now();
        match self
            .authenticator
            .authenticate(&username, &self.password)
            .await
        {
            Ok(grant) => {
                self.metrics.record_duration(
                    "session.authenticate",
                    start.elapsed(),
                    Default::default(),
                );
                self.metrics.increment("session.auth_success");
                let session = Session {
                    user_id,
                    partition,
                    username,
                    password: self.password.clone(),
                    token: grant.token,
                    csrf_token: grant.csrf_token,
                    // the configured TTL caps whatever lifetime the grant claims
                    expires_at: Instant::now() + grant.expires_in.min(self.token_ttl),
                };
                debug!(partition, "session cached");
                self.cache.insert(partition, session.clone());
                Ok(session)
            }
            Err(err) => {
                self.metrics.record_duration(
                    "session.authenticate",
                    start.elapsed(),
                    Default::default(),
                );
                self.metrics.increment("session.auth_failures");
                warn!(partition, error = %err, "authentication failed");
                Err(err)
            }
        }
    }

    /// Number of partitions with a cached session
    pub fn cached_sessions(&self) -> usize {
        self.cache.len()
    }
}

/// Production authenticator: posts to the platform's login endpoint
pub struct HttpAuthenticator {
    client: reqwest::Client,
    auth_url: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    csrf_token: Option<String>,
}

impl HttpAuthenticator {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.load.request_timeout)
            .build()
            .map_err(|e| MailstormError::InternalError {
                message: format!("failed to build auth client: {e}"),
                component: Some("session".to_string()),
            })?;
        Ok(Self {
            client,
            auth_url: config.target.auth_url.clone(),
        })
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthGrant> {
        let response = self
            .client
            .post(format!("{}/api/auth/login", self.auth_url))
            .json(&serde_json::json!({
                "email": username,
                "password": password,
            }))
            .send()
            .await
            .map_err(|e| MailstormError::AuthFailure {
                username: username.to_string(),
                message: format!("login request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MailstormError::AuthFailure {
                username: username.to_string(),
                message: format!("login rejected with status {status}"),
            });
        }

        let login: LoginResponse =
            response
                .json()
                .await
                .map_err(|e| MailstormError::AuthFailure {
                    username: username.to_string(),
                    message: format!("malformed login response: {e}"),
                })?;

        Ok(AuthGrant {
            token: login.access_token,
            csrf_token: login.csrf_token,
            expires_in: Duration::from_secs(login.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingAuthenticator {
        calls: AtomicU64,
        expires_in: Duration,
    }

    #[async_trait]
    impl Authenticator for CountingAuthenticator {
        async fn authenticate(&self, _username: &str, _password: &str) -> Result<AuthGrant> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AuthGrant {
                token: format!("token-{call}"),
                csrf_token: None,
                expires_in: self.expires_in,
            })
        }
    }

    fn manager_with(expires_in: Duration) -> (SessionManager, Arc<CountingAuthenticator>) {
        let auth = Arc::new(CountingAuthenticator {
            calls: AtomicU64::new(0),
            expires_in,
        });
        let manager = SessionManager::new(
            &Config::default(),
            auth.clone(),
            Arc::new(MetricsCollector::new()),
        );
        (manager, auth)
    }

    #[tokio::test]
    async fn test_same_partition_reuses_cached_token() {
        let (manager, auth) = manager_with(Duration::from_secs(300));

        let first = manager.get_session(3).await.unwrap();
        // 503 % 500 == 3: same partition, different user id
        let second = manager.get_session(503).await.unwrap();

        assert_eq!(first.token, second.token);
        assert_eq!(second.user_id, 503);
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_partitions_authenticate_separately() {
        let (manager, auth) = manager_with(Duration::from_secs(300));
        manager.get_session(1).await.unwrap();
        manager.get_session(2).await.unwrap();
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.cached_sessions(), 2);
    }

    #[tokio::test]
    async fn test_token_within_margin_is_refreshed() {
        // grant shorter than the refresh margin: every use re-authenticates
        let (manager, auth) = manager_with(Duration::from_secs(2));

        manager.get_session(9).await.unwrap();
        manager.get_session(9).await.unwrap();
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
    }
}
