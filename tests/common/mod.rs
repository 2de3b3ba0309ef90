pub mod provider_mock;

use std::path::Path;
use std::time::Duration;

use crmauth::config::ClientCredentials;
use crmauth::{ProviderProfile, TokenExchangeClient};
use wiremock::MockServer;

pub const REDIRECT_URI: &str = "http://localhost:7878/callback";

/// Salesforce profile whose OAuth endpoints live on `server`.
#[allow(dead_code)]
pub fn salesforce_profile(server: &MockServer) -> ProviderProfile {
    ProviderProfile::salesforce().with_endpoints(
        &format!("{}/services/oauth2/authorize", server.uri()),
        &format!("{}/services/oauth2/token", server.uri()),
    )
}

/// HubSpot profile whose OAuth endpoints and API host live on `server`.
#[allow(dead_code)]
pub fn hubspot_profile(server: &MockServer) -> ProviderProfile {
    ProviderProfile::hubspot()
        .with_endpoints(
            &format!("{}/oauth/authorize", server.uri()),
            &format!("{}/oauth/v1/token", server.uri()),
        )
        .with_api_base_url(&server.uri())
}

#[allow(dead_code)]
pub fn client_credentials(secret: Option<&str>) -> ClientCredentials {
    ClientCredentials {
        client_id: "test-client".into(),
        client_secret: secret.map(str::to_string),
        redirect_uri: REDIRECT_URI.into(),
        scopes: vec![],
    }
}

#[allow(dead_code)]
pub fn exchange_client(profile: ProviderProfile, secret: Option<&str>) -> TokenExchangeClient {
    TokenExchangeClient::new(profile, client_credentials(secret), Duration::from_secs(5)).unwrap()
}

/// Create a temp directory holding `crmauth.json` with `config` and return it.
#[allow(dead_code)]
pub fn temp_config_dir(config: &serde_json::Value) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), config);
    dir
}

#[allow(dead_code)]
pub fn write_config(dir: &Path, config: &serde_json::Value) {
    let json = serde_json::to_string_pretty(config).unwrap();
    std::fs::write(dir.join("crmauth.json"), json).unwrap();
}
