use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::config::ClientCredentials;
use crate::error::CrmAuthError;
use crate::provider::{ProviderKind, ProviderProfile};
use crate::retry::classify::ErrorBody;

/// Lifetime assumed when a provider omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Longest `expires_in` accepted from a token response (ten years).
pub const MAX_EXPIRES_IN_SECS: i64 = 10 * 365 * 24 * 3600;

/// Metadata key holding the identity document fetched after exchange.
pub const IDENTITY_KEY: &str = "identity";

/// Provider token response normalized to one shape.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenResult {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_seconds: Option<i64>,
    /// Every other field of the response, plus `identity` when resolved.
    pub raw_extra: Map<String, Value>,
}

impl TokenResult {
    /// Absolute expiry. Lifetimes are clamped to `0..=MAX_EXPIRES_IN_SECS`.
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self
            .expires_in_seconds
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
            .clamp(0, MAX_EXPIRES_IN_SECS);
        chrono::Duration::try_seconds(secs)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// The response fields the profile wants persisted on the credential.
    pub fn metadata(&self, profile: &ProviderProfile) -> Map<String, Value> {
        let mut metadata = Map::new();
        for (field, key) in profile.metadata_fields {
            if let Some(value) = self.raw_extra.get(*field).filter(|v| !v.is_null()) {
                metadata.insert((*key).to_string(), value.clone());
            }
        }
        if let Some(identity) = self.raw_extra.get(IDENTITY_KEY) {
            metadata.insert(IDENTITY_KEY.to_string(), identity.clone());
        }
        metadata
    }

    fn from_response(mut body: Map<String, Value>) -> Result<Self, CrmAuthError> {
        let access_token = match body.remove("access_token") {
            Some(Value::String(token)) if !token.is_empty() => token,
            _ => {
                return Err(CrmAuthError::TokenExchangeError {
                    code: "invalid_response".into(),
                    description: "Token response has no access_token".into(),
                })
            }
        };
        let refresh_token = match body.remove("refresh_token") {
            Some(Value::String(token)) if !token.is_empty() => Some(token),
            _ => None,
        };
        // Some providers send expires_in as a string.
        let expires_in_seconds = body.remove("expires_in").and_then(|v| match v {
            Value::Number(n) => n.as_i64().or_else(|| n.as_u64().map(|_| i64::MAX)),
            Value::String(s) => s.trim().parse::<i128>().ok().map(saturate_i64),
            _ => None,
        });
        if let Some(secs) = expires_in_seconds {
            if !(0..=MAX_EXPIRES_IN_SECS).contains(&secs) {
                return Err(CrmAuthError::TokenExchangeError {
                    code: "invalid_response".into(),
                    description: format!("Token response has out-of-range expires_in: {secs}"),
                });
            }
        }
        Ok(Self {
            access_token,
            refresh_token,
            expires_in_seconds,
            raw_extra: body,
        })
    }
}

fn saturate_i64(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

/// Performs code and refresh-token exchanges against one provider.
#[derive(Debug, Clone)]
pub struct TokenExchangeClient {
    http: reqwest::Client,
    profile: ProviderProfile,
    client: ClientCredentials,
}

impl TokenExchangeClient {
    pub fn new(
        profile: ProviderProfile,
        client: ClientCredentials,
        timeout: Duration,
    ) -> Result<Self, CrmAuthError> {
        if profile.requires_client_secret && client.client_secret.is_none() {
            return Err(CrmAuthError::ConfigError {
                path: std::path::PathBuf::from("<config>"),
                detail: format!("Provider '{}' requires a clientSecret", profile.kind),
            });
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            profile,
            client,
        })
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    pub fn kind(&self) -> ProviderKind {
        self.profile.kind
    }

    pub fn client_credentials(&self) -> &ClientCredentials {
        &self.client
    }

    /// Trade an authorization code for tokens. When the provider returns an
    /// identity URL, the identity document is fetched with the new token and
    /// attached under `raw_extra["identity"]`.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
        redirect_uri: &str,
    ) -> Result<TokenResult, CrmAuthError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }
        let mut token = self.post_token_form(form).await?;

        let identity_url = self
            .profile
            .identity_url_field
            .and_then(|field| token.raw_extra.get(field))
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(url) = identity_url {
            let identity = self.fetch_identity(&url, &token.access_token).await?;
            token.raw_extra.insert(IDENTITY_KEY.to_string(), identity);
        }
        tracing::debug!(
            provider = %self.profile.kind,
            has_refresh_token = token.refresh_token.is_some(),
            expires_in = ?token.expires_in_seconds,
            "Authorization code exchanged"
        );
        Ok(token)
    }

    /// Trade a refresh token for a new access token. The token endpoint is
    /// fixed per provider, so no tenant URL is needed.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResult, CrmAuthError> {
        let form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.post_token_form(form).await
    }

    /// GET the identity document with the freshly issued access token.
    pub async fn fetch_identity(&self, url: &str, access_token: &str) -> Result<Value, CrmAuthError> {
        let resp = self.http.get(url).bearer_auth(access_token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CrmAuthError::TokenExchangeError {
                code: format!("identity_http_{}", status.as_u16()),
                description: body,
            });
        }
        Ok(resp.json().await?)
    }

    async fn post_token_form<'a>(
        &'a self,
        mut form: Vec<(&'a str, &'a str)>,
    ) -> Result<TokenResult, CrmAuthError> {
        form.push(("client_id", self.client.client_id.as_str()));
        if let Some(ref secret) = self.client.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let resp = self
            .http
            .post(&self.profile.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(exchange_error(status.as_u16(), &text));
        }

        let body: Map<String, Value> = serde_json::from_str(&text).map_err(|e| {
            CrmAuthError::TokenExchangeError {
                code: "invalid_response".into(),
                description: format!("Failed to parse token response: {e}"),
            }
        })?;
        TokenResult::from_response(body)
    }
}

/// Map a failed token response onto `TokenExchangeError`, using the
/// provider's own error code when it sent one.
fn exchange_error(status: u16, text: &str) -> CrmAuthError {
    let parsed = ErrorBody::parse(text);
    let first = parsed.entries.first();
    let code = first
        .and_then(|e| e.code.clone())
        .unwrap_or_else(|| format!("http_{status}"));
    let description = first
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| text.trim().to_string());
    CrmAuthError::TokenExchangeError { code, description }
}
