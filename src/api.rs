use std::time::Duration;

use serde_json::Value;

use crate::credential::Credential;
use crate::error::CrmAuthError;
use crate::provider::ProviderProfile;

/// Minimal authorized JSON client for provider REST APIs. Non-2xx responses
/// become `ApiError` so `Refresher::call_with_retry` can classify them.
#[derive(Debug, Clone)]
pub struct ProviderApi {
    http: reqwest::Client,
    profile: ProviderProfile,
}

impl ProviderApi {
    pub fn new(profile: ProviderProfile, timeout: Duration) -> Result<Self, CrmAuthError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, profile })
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    /// Absolute URL for `path` on the credential's API host.
    pub fn url_for(&self, credential: &Credential, path: &str) -> Result<String, CrmAuthError> {
        let base = self.profile.api_base_url(credential)?;
        Ok(format!("{base}/{}", path.trim_start_matches('/')))
    }

    pub async fn get_json(&self, credential: &Credential, path: &str) -> Result<Value, CrmAuthError> {
        let url = self.url_for(credential, path)?;
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&credential.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        read_json(resp).await
    }

    pub async fn patch_json(
        &self,
        credential: &Credential,
        path: &str,
        body: &Value,
    ) -> Result<Value, CrmAuthError> {
        let url = self.url_for(credential, path)?;
        let resp = self
            .http
            .patch(&url)
            .bearer_auth(&credential.token)
            .json(body)
            .send()
            .await?;
        read_json(resp).await
    }
}

async fn read_json(resp: reqwest::Response) -> Result<Value, CrmAuthError> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(CrmAuthError::ApiError {
            status: status.as_u16(),
            body: text,
        });
    }
    // 204 from update endpoints.
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| CrmAuthError::ApiError {
        status: status.as_u16(),
        body: format!("Invalid JSON in response: {e}"),
    })
}
