use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::credential::Credential;
use crate::refresh::needs_refresh;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Fresh,
    DueForRefresh,
    Expired,
    /// Expired or due, with no refresh token to recover with.
    Unrefreshable,
}

impl CredentialState {
    pub fn of(credential: &Credential, now: DateTime<Utc>, buffer: Duration) -> Self {
        if !needs_refresh(credential, now, buffer) {
            return CredentialState::Fresh;
        }
        if credential.refresh_token.is_none() {
            return CredentialState::Unrefreshable;
        }
        if credential.is_expired_at(now) {
            CredentialState::Expired
        } else {
            CredentialState::DueForRefresh
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CredentialState::Fresh => "fresh",
            CredentialState::DueForRefresh => "due",
            CredentialState::Expired => "expired",
            CredentialState::Unrefreshable => "reauthorize",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusRow {
    pub user_id: String,
    pub provider: String,
    pub state: CredentialState,
    pub expires_at: DateTime<Utc>,
    pub expires_in_secs: i64,
    pub has_refresh_token: bool,
}

pub fn status_rows(credentials: &[Credential], now: DateTime<Utc>, buffer: Duration) -> Vec<StatusRow> {
    credentials
        .iter()
        .map(|c| StatusRow {
            user_id: c.user_id.clone(),
            provider: c.provider.to_string(),
            state: CredentialState::of(c, now, buffer),
            expires_at: c.expires_at,
            expires_in_secs: (c.expires_at - now).num_seconds(),
            has_refresh_token: c.refresh_token.is_some(),
        })
        .collect()
}
