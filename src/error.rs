use std::path::PathBuf;
use std::time::Duration;

use crate::provider::ProviderKind;

#[derive(Debug, thiserror::Error)]
pub enum CrmAuthError {
    #[error("Authorization callback did not include a code")]
    MissingCode,

    #[error("Provider denied authorization: {0}")]
    ProviderDenied(String),

    #[error("Authorization state does not match any pending request")]
    StateMismatch,

    #[error("Token exchange failed ({code}): {description}")]
    TokenExchangeError { code: String, description: String },

    #[error("Transport error: {0}")]
    TransportError(Box<dyn std::error::Error + Send + Sync>),

    #[error("Credential has no refresh token; re-authorization required")]
    NoRefreshToken,

    #[error("Token refresh failed: {inner}")]
    TokenRefreshFailed { inner: Box<CrmAuthError> },

    #[error("Provider API returned status {status}: {body}")]
    ApiError { status: u16, body: String },

    #[error("Provider '{0}' is not configured")]
    ProviderNotConfigured(ProviderKind),

    #[error("{}", format_unknown_provider(.name, .suggestion.as_deref()))]
    UnknownProvider {
        name: String,
        suggestion: Option<String>,
    },

    #[error("No {provider} credential stored for user '{user_id}'")]
    CredentialNotFound {
        user_id: String,
        provider: ProviderKind,
    },

    #[error("Credential store error: {0}")]
    Store(String),

    #[error("Error in config {}: {detail}", path.display())]
    ConfigError { path: PathBuf, detail: String },

    #[error("Timed out waiting for authorization callback after {}s", .0.as_secs())]
    CallbackTimeout(Duration),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

fn format_unknown_provider(name: &str, suggestion: Option<&str>) -> String {
    match suggestion {
        Some(s) => format!("Unknown provider '{name}'. Did you mean '{s}'?"),
        None => format!("Unknown provider '{name}'"),
    }
}

impl From<reqwest::Error> for CrmAuthError {
    fn from(err: reqwest::Error) -> Self {
        CrmAuthError::TransportError(Box::new(err))
    }
}

impl CrmAuthError {
    /// Error code string for structured JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            CrmAuthError::MissingCode => "missing_code",
            CrmAuthError::ProviderDenied(_) => "provider_denied",
            CrmAuthError::StateMismatch => "state_mismatch",
            CrmAuthError::TokenExchangeError { .. } => "token_exchange_error",
            CrmAuthError::TransportError(_) => "transport_error",
            CrmAuthError::NoRefreshToken => "no_refresh_token",
            CrmAuthError::TokenRefreshFailed { .. } => "token_refresh_failed",
            CrmAuthError::ApiError { .. } => "api_error",
            CrmAuthError::ProviderNotConfigured(_) => "provider_not_configured",
            CrmAuthError::UnknownProvider { .. } => "unknown_provider",
            CrmAuthError::CredentialNotFound { .. } => "not_found",
            CrmAuthError::Store(_) => "store_error",
            CrmAuthError::ConfigError { .. } => "config_error",
            CrmAuthError::CallbackTimeout(_) => "timeout",
            CrmAuthError::IoError(_) => "io_error",
        }
    }

    /// True when the only way forward is sending the user through the
    /// authorization flow again.
    pub fn requires_reauthorization(&self) -> bool {
        match self {
            CrmAuthError::NoRefreshToken
            | CrmAuthError::StateMismatch
            | CrmAuthError::ProviderDenied(_) => true,
            CrmAuthError::TokenRefreshFailed { inner } => {
                matches!(**inner, CrmAuthError::TokenExchangeError { .. })
                    || inner.requires_reauthorization()
            }
            _ => false,
        }
    }

    pub fn provider(&self) -> Option<ProviderKind> {
        match self {
            CrmAuthError::ProviderNotConfigured(p) => Some(*p),
            CrmAuthError::CredentialNotFound { provider, .. } => Some(*provider),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        if let Some(provider) = self.provider() {
            obj.insert(
                "provider".into(),
                serde_json::Value::String(provider.to_string()),
            );
        }
        obj.insert("message".into(), serde_json::Value::String(self.to_string()));
        obj.insert("code".into(), serde_json::Value::String(self.code().to_string()));
        obj.insert(
            "reauthorize".into(),
            serde_json::Value::Bool(self.requires_reauthorization()),
        );
        serde_json::json!({ "error": obj })
    }
}
