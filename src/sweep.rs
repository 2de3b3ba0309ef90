//! Periodic proactive refresh across all stored credentials.
//!
//! A sweep never fails as a whole. Each credential is refreshed in its own
//! task; failures are logged with user and provider and left for the next
//! sweep to retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::error::CrmAuthError;
use crate::provider::ProviderKind;
use crate::refresh::Refresher;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SweepFailure {
    pub user_id: String,
    pub code: String,
    pub message: String,
}

/// What happened during one sweep of one provider.
#[derive(Debug, Clone, Serialize)]
pub struct SweepOutcome {
    pub provider: ProviderKind,
    pub examined: usize,
    pub refreshed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<SweepFailure>,
    /// Set when the credential listing itself failed.
    pub load_error: Option<String>,
}

impl SweepOutcome {
    fn empty(provider: ProviderKind) -> Self {
        Self {
            provider,
            examined: 0,
            refreshed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            load_error: None,
        }
    }
}

/// Refreshes in flight at once during one provider sweep.
pub const DEFAULT_SWEEP_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct Sweeper {
    refresher: Arc<Refresher>,
    concurrency: usize,
}

enum Attempt {
    Refreshed(String),
    Failed(String, CrmAuthError),
}

impl Sweeper {
    pub fn new(refresher: Arc<Refresher>) -> Self {
        Self {
            refresher,
            concurrency: DEFAULT_SWEEP_CONCURRENCY,
        }
    }

    /// Cap concurrent token-endpoint calls. Zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn refresher(&self) -> &Arc<Refresher> {
        &self.refresher
    }

    /// Refresh every `provider` credential expiring within `threshold`.
    pub async fn run(&self, provider: ProviderKind, threshold: Duration) -> SweepOutcome {
        let mut outcome = SweepOutcome::empty(provider);
        let now = Utc::now();
        let cutoff = now.checked_add_signed(threshold).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let due = match self.refresher.store().list_expiring(provider, cutoff).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(provider = %provider, error = %e, "Sweep could not list credentials");
                outcome.load_error = Some(e.to_string());
                return outcome;
            }
        };
        outcome.examined = due.len();

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut owners = HashMap::new();
        for credential in due {
            if credential.refresh_token.is_none() {
                tracing::warn!(
                    user_id = %credential.user_id,
                    provider = %provider,
                    "Skipping credential without refresh token"
                );
                outcome.skipped.push(credential.user_id);
                continue;
            }
            let refresher = Arc::clone(&self.refresher);
            let permits = Arc::clone(&permits);
            let user_id = credential.user_id.clone();
            let handle = tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                match refresher.refresh_credential(&credential).await {
                    Ok(updated) => Attempt::Refreshed(updated.user_id),
                    Err(e) => Attempt::Failed(credential.user_id, e),
                }
            });
            owners.insert(handle.id(), user_id);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, Attempt::Refreshed(user_id))) => outcome.refreshed.push(user_id),
                Ok((_, Attempt::Failed(user_id, e))) => {
                    tracing::warn!(
                        user_id = %user_id,
                        provider = %provider,
                        error = %e,
                        "Sweep refresh failed"
                    );
                    outcome.failed.push(SweepFailure {
                        user_id,
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    let user_id = owners.remove(&e.id()).unwrap_or_default();
                    tracing::error!(
                        user_id = %user_id,
                        provider = %provider,
                        error = %e,
                        "Sweep task aborted"
                    );
                    outcome.failed.push(SweepFailure {
                        user_id,
                        code: "task_aborted".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        outcome.refreshed.sort();
        outcome.failed.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        tracing::info!(
            provider = %provider,
            examined = outcome.examined,
            refreshed = outcome.refreshed.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            "Sweep finished"
        );
        outcome
    }

    /// Sweep every configured provider.
    pub async fn run_all(&self, threshold: Duration) -> Vec<SweepOutcome> {
        let mut outcomes = Vec::new();
        for provider in self.refresher.providers() {
            outcomes.push(self.run(provider, threshold).await);
        }
        outcomes
    }

    /// Run `run_all` every `interval` until `shutdown` flips to true or its
    /// sender is dropped. The first sweep starts immediately.
    pub fn spawn(
        self,
        interval: StdDuration,
        threshold: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_all(threshold).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("Sweep scheduler stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientCredentials;
    use crate::credential::{Credential, CredentialStore, CredentialUpdate, MemoryCredentialStore};
    use crate::oauth::token::TokenExchangeClient;
    use crate::provider::ProviderProfile;
    use async_trait::async_trait;
    use chrono::DateTime;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> TokenExchangeClient {
        let profile = ProviderProfile::hubspot().with_endpoints(
            &format!("{}/oauth/authorize", server.uri()),
            &format!("{}/oauth/v1/token", server.uri()),
        );
        TokenExchangeClient::new(
            profile,
            ClientCredentials {
                client_id: "cid".into(),
                client_secret: Some("s".into()),
                redirect_uri: "http://localhost/cb".into(),
                scopes: vec![],
            },
            StdDuration::from_secs(5),
        )
        .unwrap()
    }

    fn cred(user: &str, minutes: i64, refresh: Option<&str>) -> Credential {
        Credential::new(
            user,
            ProviderKind::Hubspot,
            "old",
            refresh,
            Utc::now() + Duration::minutes(minutes),
        )
    }

    #[tokio::test]
    async fn failing_refresh_does_not_affect_siblings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("refresh_token=revoked"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "status": "BAD_REFRESH_TOKEN", "message": "refresh token revoked"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("refresh_token=good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new", "expires_in": 1800
            })))
            .expect(2)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::with_credentials([
            cred("a", 1, Some("good")),
            cred("b", 2, Some("revoked")),
            cred("c", 3, Some("good")),
            cred("later", 120, Some("good")),
        ]));
        let refresher = Refresher::new(store.clone()).with_client(client_for(&server));
        let outcome = Sweeper::new(Arc::new(refresher))
            .run(ProviderKind::Hubspot, Duration::minutes(5))
            .await;

        assert_eq!(outcome.examined, 3);
        assert_eq!(outcome.refreshed, vec!["a", "c"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].user_id, "b");
        assert_eq!(outcome.failed[0].code, "token_refresh_failed");
        assert_eq!(store.load("b", ProviderKind::Hubspot).await.unwrap().token, "old");
        assert_eq!(store.load("later", ProviderKind::Hubspot).await.unwrap().token, "old");
    }

    #[tokio::test]
    async fn unconfigured_provider_counts_as_failures() {
        let store = Arc::new(MemoryCredentialStore::with_credentials([cred("a", 1, Some("r"))]));
        let sweeper = Sweeper::new(Arc::new(Refresher::new(store)));
        let outcome = sweeper.run(ProviderKind::Hubspot, Duration::minutes(5)).await;
        assert_eq!(outcome.failed[0].code, "provider_not_configured");
    }

    struct UnavailableStore;

    #[async_trait]
    impl CredentialStore for UnavailableStore {
        async fn load(&self, _u: &str, _p: ProviderKind) -> Result<Credential, CrmAuthError> {
            Err(CrmAuthError::Store("unavailable".into()))
        }
        async fn update(&self, _c: &Credential, _f: CredentialUpdate) -> Result<Credential, CrmAuthError> {
            Err(CrmAuthError::Store("unavailable".into()))
        }
        async fn upsert(&self, _c: Credential) -> Result<Credential, CrmAuthError> {
            Err(CrmAuthError::Store("unavailable".into()))
        }
        async fn list(&self, _p: Option<ProviderKind>) -> Result<Vec<Credential>, CrmAuthError> {
            Err(CrmAuthError::Store("unavailable".into()))
        }
        async fn list_expiring(
            &self,
            _p: ProviderKind,
            _before: DateTime<Utc>,
        ) -> Result<Vec<Credential>, CrmAuthError> {
            Err(CrmAuthError::Store("unavailable".into()))
        }
    }

    #[tokio::test]
    async fn store_outage_is_reported_not_raised() {
        let sweeper = Sweeper::new(Arc::new(Refresher::new(Arc::new(UnavailableStore))));
        let outcome = sweeper.run(ProviderKind::Salesforce, Duration::minutes(5)).await;
        assert_eq!(outcome.examined, 0);
        assert!(outcome.load_error.unwrap().contains("unavailable"));
    }

    /// Delegates to memory but holds each update open to observe overlap.
    struct SlowUpdateStore {
        inner: MemoryCredentialStore,
        in_flight: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
        panic_for: Option<&'static str>,
    }

    impl SlowUpdateStore {
        fn new(credentials: Vec<Credential>, panic_for: Option<&'static str>) -> Self {
            Self {
                inner: MemoryCredentialStore::with_credentials(credentials),
                in_flight: Default::default(),
                peak: Default::default(),
                panic_for,
            }
        }
    }

    #[async_trait]
    impl CredentialStore for SlowUpdateStore {
        async fn load(&self, u: &str, p: ProviderKind) -> Result<Credential, CrmAuthError> {
            self.inner.load(u, p).await
        }
        async fn update(&self, c: &Credential, f: CredentialUpdate) -> Result<Credential, CrmAuthError> {
            use std::sync::atomic::Ordering;
            if self.panic_for == Some(c.user_id.as_str()) {
                panic!("store blew up for {}", c.user_id);
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(StdDuration::from_millis(40)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.update(c, f).await
        }
        async fn upsert(&self, c: Credential) -> Result<Credential, CrmAuthError> {
            self.inner.upsert(c).await
        }
        async fn list(&self, p: Option<ProviderKind>) -> Result<Vec<Credential>, CrmAuthError> {
            self.inner.list(p).await
        }
    }

    async fn ok_token_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new", "expires_in": 3600
            })))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn concurrency_limit_caps_parallel_refreshes() {
        let server = ok_token_server().await;
        let users = ["u1", "u2", "u3", "u4", "u5", "u6"];
        let store = Arc::new(SlowUpdateStore::new(
            users.iter().map(|u| cred(u, 1, Some("r"))).collect(),
            None,
        ));
        let refresher = Refresher::new(store.clone()).with_client(client_for(&server));
        let sweeper = Sweeper::new(Arc::new(refresher)).with_concurrency(2);
        assert_eq!(sweeper.concurrency(), 2);

        let outcome = sweeper.run(ProviderKind::Hubspot, Duration::minutes(5)).await;
        assert_eq!(outcome.refreshed.len(), 6);
        let peak = store.peak.load(std::sync::atomic::Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
    }

    #[test]
    fn zero_concurrency_is_raised_to_one() {
        let store = Arc::new(MemoryCredentialStore::new());
        let sweeper = Sweeper::new(Arc::new(Refresher::new(store))).with_concurrency(0);
        assert_eq!(sweeper.concurrency(), 1);
    }

    #[tokio::test]
    async fn panicking_refresh_is_reported_as_failure() {
        let server = ok_token_server().await;
        let store = Arc::new(SlowUpdateStore::new(
            vec![cred("ok", 1, Some("r")), cred("boom", 1, Some("r")), cred("none", 1, None)],
            Some("boom"),
        ));
        let refresher = Refresher::new(store).with_client(client_for(&server));
        let outcome = Sweeper::new(Arc::new(refresher))
            .run(ProviderKind::Hubspot, Duration::minutes(5))
            .await;

        assert_eq!(outcome.examined, 3);
        assert_eq!(
            outcome.examined,
            outcome.refreshed.len() + outcome.skipped.len() + outcome.failed.len()
        );
        assert_eq!(outcome.refreshed, vec!["ok"]);
        assert_eq!(outcome.skipped, vec!["none"]);
        assert_eq!(outcome.failed[0].user_id, "boom");
        assert_eq!(outcome.failed[0].code, "task_aborted");
    }

    #[tokio::test]
    async fn huge_threshold_does_not_overflow() {
        let store = Arc::new(MemoryCredentialStore::with_credentials([cred("far", 60 * 24 * 365, None)]));
        let sweeper = Sweeper::new(Arc::new(Refresher::new(store)));
        let outcome = sweeper.run(ProviderKind::Hubspot, Duration::MAX).await;
        assert_eq!(outcome.skipped, vec!["far"]);
    }

    #[tokio::test]
    async fn spawned_scheduler_sweeps_and_stops() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new", "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::with_credentials([cred("a", 1, Some("r"))]));
        let refresher = Refresher::new(store.clone()).with_client(client_for(&server));
        let (tx, rx) = watch::channel(false);
        let handle = Sweeper::new(Arc::new(refresher)).spawn(
            StdDuration::from_secs(3600),
            Duration::minutes(5),
            rx,
        );

        let mut refreshed = false;
        for _ in 0..100 {
            if store.load("a", ProviderKind::Hubspot).await.unwrap().token == "new" {
                refreshed = true;
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        assert!(refreshed, "first tick should sweep immediately");

        tx.send(true).unwrap();
        tokio::time::timeout(StdDuration::from_secs(2), handle)
            .await
            .expect("scheduler should stop")
            .unwrap();
    }
}
