//! Expiry policy and credential refresh.
//!
//! Two callers can refresh the same credential at once (a live request and
//! the sweep). There is no lock around the read-modify-write: both obtain a
//! valid token from the provider and the store keeps whichever update lands
//! last. Each token stays usable until its own expiry, so the loser's token
//! simply goes unused.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::CrmAuthConfig;
use crate::credential::{Credential, CredentialStore, CredentialUpdate};
use crate::error::CrmAuthError;
use crate::oauth::token::TokenExchangeClient;
use crate::provider::ProviderKind;

pub const DEFAULT_REFRESH_BUFFER_SECS: i64 = 300;

/// True when `credential` expires within `buffer` of `now`.
pub fn needs_refresh(credential: &Credential, now: DateTime<Utc>, buffer: Duration) -> bool {
    credential.expires_at < now + buffer
}

pub struct Refresher {
    store: Arc<dyn CredentialStore>,
    clients: HashMap<ProviderKind, TokenExchangeClient>,
    buffer: Duration,
}

impl std::fmt::Debug for Refresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Refresher")
            .field("providers", &self.providers())
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

impl Refresher {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            clients: HashMap::new(),
            buffer: Duration::seconds(DEFAULT_REFRESH_BUFFER_SECS),
        }
    }

    /// Build a refresher with a token client for every configured provider.
    pub fn from_config(
        config: &CrmAuthConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, CrmAuthError> {
        let mut refresher = Self::new(store).with_buffer(config.refresh_buffer()?);
        for (kind, client) in &config.providers {
            let exchange =
                TokenExchangeClient::new(kind.profile(), client.clone(), config.http_timeout())?;
            refresher = refresher.with_client(exchange);
        }
        Ok(refresher)
    }

    pub fn with_client(mut self, client: TokenExchangeClient) -> Self {
        self.clients.insert(client.kind(), client);
        self
    }

    pub fn with_buffer(mut self, buffer: Duration) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn buffer(&self) -> Duration {
        self.buffer
    }

    /// Configured providers, in stable order.
    pub fn providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.clients.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn client(&self, kind: ProviderKind) -> Result<&TokenExchangeClient, CrmAuthError> {
        self.clients
            .get(&kind)
            .ok_or(CrmAuthError::ProviderNotConfigured(kind))
    }

    /// Return a credential safe to use right now. A credential outside the
    /// refresh buffer comes back unchanged without any network call.
    pub async fn ensure_valid_token(&self, credential: &Credential) -> Result<Credential, CrmAuthError> {
        if !needs_refresh(credential, Utc::now(), self.buffer) {
            tracing::debug!(
                user_id = %credential.user_id,
                provider = %credential.provider,
                "Token still valid"
            );
            return Ok(credential.clone());
        }
        self.refresh_credential(credential).await
    }

    /// Refresh unconditionally and persist the result.
    ///
    /// The caller's `credential` is never touched; on any failure the stored
    /// record is left as it was.
    pub async fn refresh_credential(&self, credential: &Credential) -> Result<Credential, CrmAuthError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or(CrmAuthError::NoRefreshToken)?;
        let client = self.client(credential.provider)?;

        let token = client
            .refresh(refresh_token)
            .await
            .map_err(|e| CrmAuthError::TokenRefreshFailed { inner: Box::new(e) })?;

        let fields = CredentialUpdate {
            expires_at: token.expires_at(Utc::now()),
            refresh_token: token.refresh_token.clone(),
            metadata: token.metadata(client.profile()),
            token: token.access_token,
        };
        let updated = self.store.update(credential, fields).await?;
        tracing::info!(
            user_id = %updated.user_id,
            provider = %updated.provider,
            expires_at = %updated.expires_at,
            "Refreshed credential"
        );
        Ok(updated)
    }
}
