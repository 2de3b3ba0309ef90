pub mod file;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CrmAuthError;
use crate::provider::ProviderKind;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;

/// One stored OAuth credential for a (user, provider) pair.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub user_id: String,
    pub provider: ProviderKind,
    pub token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl Credential {
    pub fn new(
        user_id: &str,
        provider: ProviderKind,
        token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            provider,
            token: token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at,
            metadata: Map::new(),
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Return a copy with `fields` applied. Stores use this so every
    /// implementation follows the same update rules.
    pub fn with_update(&self, fields: &CredentialUpdate) -> Credential {
        let mut updated = self.clone();
        updated.token = fields.token.clone();
        updated.expires_at = fields.expires_at;
        if let Some(ref rotated) = fields.refresh_token {
            updated.refresh_token = Some(rotated.clone());
        }
        for (key, value) in &fields.metadata {
            updated.metadata.insert(key.clone(), value.clone());
        }
        updated
    }
}

/// The fields a refresh writes back in one atomic update.
#[derive(Clone, Default)]
pub struct CredentialUpdate {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// A rotated refresh token. `None` keeps the stored one.
    pub refresh_token: Option<String>,
    /// Entries merged into the stored metadata.
    pub metadata: Map<String, Value>,
}

impl fmt::Debug for CredentialUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialUpdate")
            .field("expires_at", &self.expires_at)
            .field("rotates_refresh_token", &self.refresh_token.is_some())
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Persistence boundary for credentials. Each call must be atomic on its
/// own; concurrent updates to the same record resolve as last-writer-wins.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, user_id: &str, provider: ProviderKind) -> Result<Credential, CrmAuthError>;

    /// Apply `fields` to the stored record identified by `credential` and
    /// return the stored result.
    async fn update(
        &self,
        credential: &Credential,
        fields: CredentialUpdate,
    ) -> Result<Credential, CrmAuthError>;

    /// Insert or replace a whole credential, e.g. after a fresh authorization.
    async fn upsert(&self, credential: Credential) -> Result<Credential, CrmAuthError>;

    /// All credentials, optionally restricted to one provider, ordered by
    /// provider then user id.
    async fn list(&self, provider: Option<ProviderKind>) -> Result<Vec<Credential>, CrmAuthError>;

    /// Credentials for `provider` whose expiry falls before `before`.
    async fn list_expiring(
        &self,
        provider: ProviderKind,
        before: DateTime<Utc>,
    ) -> Result<Vec<Credential>, CrmAuthError> {
        let all = self.list(Some(provider)).await?;
        Ok(all.into_iter().filter(|c| c.expires_at < before).collect())
    }
}

fn sort_credentials(credentials: &mut [Credential]) {
    credentials.sort_by(|a, b| {
        a.provider
            .cmp(&b.provider)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
}
