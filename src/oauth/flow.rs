use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::credential::{Credential, CredentialStore};
use crate::error::CrmAuthError;
use crate::oauth::callback::listen_for_callback;
use crate::oauth::pkce::{begin_authorization, complete_authorization, AuthCode};
use crate::oauth::token::{TokenExchangeClient, TokenResult};

/// Build the credential to persist from a fresh code exchange.
pub fn credential_from_token(
    user_id: &str,
    exchange: &TokenExchangeClient,
    token: TokenResult,
    now: DateTime<Utc>,
) -> Credential {
    let mut credential = Credential::new(
        user_id,
        exchange.kind(),
        &token.access_token,
        token.refresh_token.as_deref(),
        token.expires_at(now),
    );
    credential.metadata = token.metadata(exchange.profile());
    credential
}

/// Exchange a validated authorization code and persist the new credential.
pub async fn finish_authorization(
    exchange: &TokenExchangeClient,
    store: &dyn CredentialStore,
    user_id: &str,
    auth: &AuthCode,
) -> Result<Credential, CrmAuthError> {
    if auth.provider != exchange.kind() {
        return Err(CrmAuthError::StateMismatch);
    }
    let token = exchange
        .exchange_code(&auth.code, auth.code_verifier.as_deref(), &auth.redirect_uri)
        .await?;
    if token.refresh_token.is_none() {
        tracing::warn!(
            user_id,
            provider = %exchange.kind(),
            "Provider issued no refresh token; credential will need re-authorization when it expires"
        );
    }
    let credential = credential_from_token(user_id, exchange, token, Utc::now());
    store.upsert(credential).await
}

/// Run the interactive browser flow for `user_id` through a loopback
/// listener on the configured redirect URI's port.
pub async fn connect(
    exchange: &TokenExchangeClient,
    store: &dyn CredentialStore,
    user_id: &str,
    timeout: Duration,
) -> Result<Credential, CrmAuthError> {
    let client = exchange.client_credentials();
    let redirect_uri = client.redirect_uri.as_str();
    let port = loopback_port(redirect_uri)?;

    let (auth_url, session) = begin_authorization(exchange.profile(), client, &[], redirect_uri)?;

    if webbrowser::open(&auth_url).is_err() {
        tracing::warn!("Could not open browser automatically. Please visit:\n{auth_url}");
    }

    let params = listen_for_callback(port, timeout).await?;
    let auth = complete_authorization(&params, &session)?;
    finish_authorization(exchange, store, user_id, &auth).await
}

/// The port of an `http://localhost:<port>/...` or `http://127.0.0.1:<port>/...`
/// redirect URI.
fn loopback_port(redirect_uri: &str) -> Result<u16, CrmAuthError> {
    let invalid = |detail: String| CrmAuthError::ConfigError {
        path: std::path::PathBuf::from("<config>"),
        detail,
    };
    let url = reqwest::Url::parse(redirect_uri)
        .map_err(|e| invalid(format!("Invalid redirectUri '{redirect_uri}': {e}")))?;
    match url.host_str() {
        Some("localhost") | Some("127.0.0.1") => {}
        _ => {
            return Err(invalid(format!(
                "redirectUri '{redirect_uri}' is not a loopback address; interactive connect needs one"
            )))
        }
    }
    url.port_or_known_default()
        .ok_or_else(|| invalid(format!("redirectUri '{redirect_uri}' has no port")))
}
