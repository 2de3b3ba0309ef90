use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ClientCredentials;
use crate::error::CrmAuthError;
use crate::provider::{ProviderKind, ProviderProfile};

pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
}

pub fn generate_pkce() -> PkceChallenge {
    let mut buf = [0u8; 32];
    rand::Rng::fill_bytes(&mut rand::rng(), &mut buf);
    let code_verifier = URL_SAFE_NO_PAD.encode(buf);
    let code_challenge = challenge_for(&code_verifier);
    PkceChallenge {
        code_verifier,
        code_challenge,
    }
}

/// S256 challenge: base64url (no padding) of the SHA-256 of the verifier.
pub fn challenge_for(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// RFC 7636 verifier shape: 43 to 128 unreserved characters.
pub fn is_valid_verifier(code_verifier: &str) -> bool {
    (43..=128).contains(&code_verifier.len())
        && code_verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Everything that must survive between sending the user to the provider
/// and receiving the callback. Hosts keep it in scoped session storage.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthorizationSession {
    pub provider: ProviderKind,
    pub state: String,
    pub code_verifier: Option<String>,
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for AuthorizationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationSession")
            .field("provider", &self.provider)
            .field("state", &self.state)
            .field("has_code_verifier", &self.code_verifier.is_some())
            .field("redirect_uri", &self.redirect_uri)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Query parameters the provider appends to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse a raw query string (without the leading `?`).
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        let Ok(url) = reqwest::Url::parse(&format!("http://callback.invalid/?{query}")) else {
            return params;
        };
        for (key, value) in url.query_pairs() {
            let value = Some(value.into_owned()).filter(|v| !v.is_empty());
            match key.as_ref() {
                "code" => params.code = value,
                "state" => params.state = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        params
    }
}

/// Result of a successful callback, ready for the token exchange.
#[derive(Debug, Clone)]
pub struct AuthCode {
    pub provider: ProviderKind,
    pub code: String,
    pub code_verifier: Option<String>,
    pub redirect_uri: String,
}

/// Build the provider authorization URL and the session to keep until the
/// callback arrives. Empty `scopes` falls back to the configured scopes, then
/// the provider defaults.
pub fn begin_authorization(
    profile: &ProviderProfile,
    client: &ClientCredentials,
    scopes: &[String],
    redirect_uri: &str,
) -> Result<(String, AuthorizationSession), CrmAuthError> {
    let scope = if !scopes.is_empty() {
        scopes.join(" ")
    } else if !client.scopes.is_empty() {
        client.scopes.join(" ")
    } else {
        profile.default_scopes.join(" ")
    };
    let state = uuid::Uuid::new_v4().simple().to_string();

    let mut params: Vec<(&str, &str)> = vec![
        ("response_type", "code"),
        ("client_id", client.client_id.as_str()),
        ("redirect_uri", redirect_uri),
        ("scope", scope.as_str()),
        ("state", state.as_str()),
    ];
    let pkce = profile.uses_pkce.then(generate_pkce);
    if let Some(ref pkce) = pkce {
        params.push(("code_challenge", pkce.code_challenge.as_str()));
        params.push(("code_challenge_method", "S256"));
    }

    let url = reqwest::Url::parse_with_params(&profile.authorize_url, &params).map_err(|e| {
        CrmAuthError::ConfigError {
            path: std::path::PathBuf::from("<provider>"),
            detail: format!("Invalid authorize URL '{}': {e}", profile.authorize_url),
        }
    })?;

    let session = AuthorizationSession {
        provider: profile.kind,
        state,
        code_verifier: pkce.map(|p| p.code_verifier),
        redirect_uri: redirect_uri.to_string(),
        created_at: Utc::now(),
    };
    Ok((url.to_string(), session))
}

/// Validate the callback against the stored session.
///
/// Checks run in this order: provider error, state, code. A callback with a
/// foreign state is rejected before its code is even looked at.
pub fn complete_authorization(
    params: &CallbackParams,
    session: &AuthorizationSession,
) -> Result<AuthCode, CrmAuthError> {
    if let Some(ref error) = params.error {
        let reason = match params.error_description {
            Some(ref desc) => format!("{error}: {desc}"),
            None => error.clone(),
        };
        return Err(CrmAuthError::ProviderDenied(reason));
    }
    if params.state.as_deref() != Some(session.state.as_str()) {
        return Err(CrmAuthError::StateMismatch);
    }
    let code = params.code.clone().ok_or(CrmAuthError::MissingCode)?;
    Ok(AuthCode {
        provider: session.provider,
        code,
        code_verifier: session.code_verifier.clone(),
        redirect_uri: session.redirect_uri.clone(),
    })
}
