use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::error::CrmAuthError;
use crate::retry::classify::{is_session_error_with, ErrorBody};

const SALESFORCE_AUTHORIZE_URL: &str = "https://login.salesforce.com/services/oauth2/authorize";
const SALESFORCE_TOKEN_URL: &str = "https://login.salesforce.com/services/oauth2/token";
const HUBSPOT_AUTHORIZE_URL: &str = "https://app.hubspot.com/oauth/authorize";
const HUBSPOT_TOKEN_URL: &str = "https://api.hubapi.com/oauth/v1/token";
const HUBSPOT_API_BASE_URL: &str = "https://api.hubapi.com";

/// Metadata key holding the tenant-specific API host.
pub const INSTANCE_URL_KEY: &str = "instance_url";
/// Metadata key holding the identity endpoint returned at exchange time.
pub const IDENTITY_URL_KEY: &str = "identity_url";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Salesforce,
    Hubspot,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Salesforce, ProviderKind::Hubspot];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Salesforce => "salesforce",
            ProviderKind::Hubspot => "hubspot",
        }
    }

    pub fn profile(&self) -> ProviderProfile {
        match self {
            ProviderKind::Salesforce => ProviderProfile::salesforce(),
            ProviderKind::Hubspot => ProviderProfile::hubspot(),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = CrmAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        if let Some(kind) = Self::ALL.iter().find(|k| k.as_str() == lowered) {
            return Ok(*kind);
        }
        let suggestion = Self::ALL
            .iter()
            .map(|k| (k.as_str(), strsim::jaro_winkler(&lowered, k.as_str())))
            .filter(|(_, score)| *score > 0.8)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| name.to_string());
        Err(CrmAuthError::UnknownProvider {
            name: s.to_string(),
            suggestion,
        })
    }
}

/// Everything that differs between providers: endpoints, response field
/// names and the shape of their "token no longer valid" errors.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub kind: ProviderKind,
    pub authorize_url: String,
    pub token_url: String,
    /// Fixed API host. `None` means the host comes from the credential's
    /// `instance_url` metadata.
    pub api_base_url: Option<String>,
    pub default_scopes: &'static [&'static str],
    pub uses_pkce: bool,
    pub requires_client_secret: bool,
    /// Token response field carrying a URL to fetch the user's identity from.
    pub identity_url_field: Option<&'static str>,
    /// Token response fields copied into credential metadata, as
    /// `(response_field, metadata_key)`.
    pub metadata_fields: &'static [(&'static str, &'static str)],
    pub session_error_codes: &'static [&'static str],
}

impl ProviderProfile {
    pub fn salesforce() -> Self {
        Self {
            kind: ProviderKind::Salesforce,
            authorize_url: SALESFORCE_AUTHORIZE_URL.to_string(),
            token_url: SALESFORCE_TOKEN_URL.to_string(),
            api_base_url: None,
            default_scopes: &["api", "refresh_token", "offline_access"],
            uses_pkce: true,
            requires_client_secret: false,
            identity_url_field: Some("id"),
            metadata_fields: &[("instance_url", INSTANCE_URL_KEY), ("id", IDENTITY_URL_KEY)],
            session_error_codes: &["INVALID_SESSION_ID", "INVALID_AUTH_HEADER"],
        }
    }

    pub fn hubspot() -> Self {
        Self {
            kind: ProviderKind::Hubspot,
            authorize_url: HUBSPOT_AUTHORIZE_URL.to_string(),
            token_url: HUBSPOT_TOKEN_URL.to_string(),
            api_base_url: Some(HUBSPOT_API_BASE_URL.to_string()),
            default_scopes: &[
                "oauth",
                "crm.objects.contacts.read",
                "crm.objects.contacts.write",
            ],
            uses_pkce: false,
            requires_client_secret: true,
            identity_url_field: None,
            metadata_fields: &[("hub_id", "hub_id")],
            session_error_codes: &["EXPIRED_AUTHENTICATION", "INVALID_AUTHENTICATION"],
        }
    }

    /// Point the profile at different endpoints. Intended for tests that run
    /// against a local mock server.
    pub fn with_endpoints(mut self, authorize_url: &str, token_url: &str) -> Self {
        self.authorize_url = authorize_url.to_string();
        self.token_url = token_url.to_string();
        self
    }

    pub fn with_api_base_url(mut self, base_url: &str) -> Self {
        self.api_base_url = Some(base_url.to_string());
        self
    }

    /// Resolve the API host for calls made with `credential`.
    pub fn api_base_url(&self, credential: &Credential) -> Result<String, CrmAuthError> {
        if let Some(ref base) = self.api_base_url {
            return Ok(base.trim_end_matches('/').to_string());
        }
        credential
            .metadata_str(INSTANCE_URL_KEY)
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                CrmAuthError::Store(format!(
                    "{} credential for '{}' has no {INSTANCE_URL_KEY}",
                    self.kind, credential.user_id
                ))
            })
    }

    pub fn is_session_error(&self, status: u16, body: &ErrorBody) -> bool {
        is_session_error_with(status, body, self.session_error_codes)
    }
}
