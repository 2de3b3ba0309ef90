//! Short-lived storage for in-flight authorization attempts.
//!
//! Each session is keyed by its `state` token and can be taken exactly once.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{Duration, Utc};

use crate::config::ClientCredentials;
use crate::error::CrmAuthError;
use crate::provider::ProviderProfile;

use super::pkce::{begin_authorization, complete_authorization, AuthCode, AuthorizationSession, CallbackParams};

pub const DEFAULT_SESSION_TTL_SECS: i64 = 600;

#[derive(Debug)]
pub struct PendingAuthorizations {
    sessions: Mutex<HashMap<String, AuthorizationSession>>,
    ttl: Duration,
}

impl Default for PendingAuthorizations {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_SESSION_TTL_SECS))
    }
}

impl PendingAuthorizations {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Start an authorization attempt and remember its session. Returns the
    /// URL to send the user to.
    pub fn begin(
        &self,
        profile: &ProviderProfile,
        client: &ClientCredentials,
        scopes: &[String],
    ) -> Result<String, CrmAuthError> {
        let (url, session) = begin_authorization(profile, client, scopes, &client.redirect_uri)?;
        self.insert(session);
        Ok(url)
    }

    pub fn insert(&self, session: AuthorizationSession) {
        self.lock().insert(session.state.clone(), session);
    }

    /// Remove and return the session for `state`, if present and not expired.
    pub fn take(&self, state: &str) -> Option<AuthorizationSession> {
        let session = self.lock().remove(state)?;
        if Utc::now() - session.created_at > self.ttl {
            tracing::debug!(provider = %session.provider, "Authorization session expired");
            return None;
        }
        Some(session)
    }

    /// Consume the session matching the callback's state and validate the
    /// callback against it. Unknown, replayed or expired states fail with
    /// `StateMismatch`.
    pub fn complete(&self, params: &CallbackParams) -> Result<AuthCode, CrmAuthError> {
        let state = params.state.as_deref().ok_or(CrmAuthError::StateMismatch)?;
        let session = self.take(state).ok_or(CrmAuthError::StateMismatch)?;
        complete_authorization(params, &session)
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| now - s.created_at <= self.ttl);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AuthorizationSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
