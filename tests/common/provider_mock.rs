use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Token endpoint answering an authorization-code grant the way Salesforce
/// does: no `expires_in`, plus instance and identity URLs.
#[allow(dead_code)]
pub async fn mount_salesforce_code_grant(server: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access_token,
            "refresh_token": "sf-refresh",
            "instance_url": server.uri(),
            "id": format!("{}/id/00D/005", server.uri()),
            "token_type": "Bearer",
            "issued_at": "1700000000000"
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/id/00D/005"))
        .and(header("authorization", format!("Bearer {access_token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "user_id": "005",
            "organization_id": "00D",
            "username": "ada@example.com"
        })))
        .expect(1)
        .mount(server)
        .await;
}

/// Refresh grant on the Salesforce token path returning `access_token`.
/// Salesforce does not rotate the refresh token.
#[allow(dead_code)]
pub async fn mount_salesforce_refresh(server: &MockServer, access_token: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access_token,
            "instance_url": server.uri(),
            "token_type": "Bearer"
        })))
        .expect(times)
        .mount(server)
        .await;
}

/// HubSpot refresh grant for one specific refresh token.
#[allow(dead_code)]
pub async fn mount_hubspot_refresh(
    server: &MockServer,
    refresh_token: &str,
    access_token: &str,
    times: u64,
) {
    Mock::given(method("POST"))
        .and(path("/oauth/v1/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains(format!("refresh_token={refresh_token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access_token,
            "refresh_token": refresh_token,
            "expires_in": 1800,
            "token_type": "bearer"
        })))
        .expect(times)
        .mount(server)
        .await;
}

/// HubSpot rejecting one refresh token as revoked.
#[allow(dead_code)]
pub async fn mount_hubspot_refresh_rejected(server: &MockServer, refresh_token: &str) {
    Mock::given(method("POST"))
        .and(path("/oauth/v1/token"))
        .and(body_string_contains(format!("refresh_token={refresh_token}").as_str()))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "status": "BAD_REFRESH_TOKEN",
            "message": "missing or unknown refresh token",
            "correlationId": "3c8a2f63-1e4b-4d8e-9a55-0f1f2b7c9d10"
        })))
        .expect(1)
        .mount(server)
        .await;
}
