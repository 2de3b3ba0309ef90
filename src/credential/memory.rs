use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::CrmAuthError;
use crate::provider::ProviderKind;

use super::{sort_credentials, Credential, CredentialStore, CredentialUpdate};

/// In-process credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: Mutex<HashMap<(String, ProviderKind), Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: impl IntoIterator<Item = Credential>) -> Self {
        let records = credentials
            .into_iter()
            .map(|c| ((c.user_id.clone(), c.provider), c))
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, user_id: &str, provider: ProviderKind) -> Result<Credential, CrmAuthError> {
        self.records
            .lock()
            .await
            .get(&(user_id.to_string(), provider))
            .cloned()
            .ok_or_else(|| CrmAuthError::CredentialNotFound {
                user_id: user_id.to_string(),
                provider,
            })
    }

    async fn update(
        &self,
        credential: &Credential,
        fields: CredentialUpdate,
    ) -> Result<Credential, CrmAuthError> {
        let mut records = self.records.lock().await;
        let key = (credential.user_id.clone(), credential.provider);
        let stored = records
            .get_mut(&key)
            .ok_or_else(|| CrmAuthError::CredentialNotFound {
                user_id: credential.user_id.clone(),
                provider: credential.provider,
            })?;
        *stored = stored.with_update(&fields);
        Ok(stored.clone())
    }

    async fn upsert(&self, credential: Credential) -> Result<Credential, CrmAuthError> {
        let key = (credential.user_id.clone(), credential.provider);
        self.records.lock().await.insert(key, credential.clone());
        Ok(credential)
    }

    async fn list(&self, provider: Option<ProviderKind>) -> Result<Vec<Credential>, CrmAuthError> {
        let records = self.records.lock().await;
        let mut all: Vec<Credential> = records
            .values()
            .filter(|c| provider.map_or(true, |p| c.provider == p))
            .cloned()
            .collect();
        sort_credentials(&mut all);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn cred(user: &str, provider: ProviderKind, minutes: i64) -> Credential {
        Credential::new(user, provider, "tok", Some("ref"), Utc::now() + Duration::minutes(minutes))
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let store = MemoryCredentialStore::new();
        let err = store.load("nobody", ProviderKind::Hubspot).await.unwrap_err();
        assert!(matches!(err, CrmAuthError::CredentialNotFound { .. }));
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = MemoryCredentialStore::new();
        let err = store
            .update(&cred("u", ProviderKind::Hubspot, 1), CredentialUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CrmAuthError::CredentialNotFound { .. }));
    }

    #[tokio::test]
    async fn update_applies_fields() {
        let store = MemoryCredentialStore::with_credentials([cred("u", ProviderKind::Hubspot, 1)]);
        let c = store.load("u", ProviderKind::Hubspot).await.unwrap();
        let updated = store
            .update(
                &c,
                CredentialUpdate {
                    token: "new".into(),
                    expires_at: Utc::now() + Duration::hours(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.token, "new");
        assert_eq!(updated.refresh_token.as_deref(), Some("ref"));
        assert_eq!(store.load("u", ProviderKind::Hubspot).await.unwrap().token, "new");
    }

    #[tokio::test]
    async fn list_filters_and_sorts() {
        let store = MemoryCredentialStore::with_credentials([
            cred("b", ProviderKind::Salesforce, 1),
            cred("a", ProviderKind::Salesforce, 1),
            cred("a", ProviderKind::Hubspot, 1),
        ]);
        let sf = store.list(Some(ProviderKind::Salesforce)).await.unwrap();
        let users: Vec<&str> = sf.iter().map(|c| c.user_id.as_str()).collect();
        assert_eq!(users, vec!["a", "b"]);
        assert_eq!(store.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn list_expiring_uses_cutoff() {
        let store = MemoryCredentialStore::with_credentials([
            cred("soon", ProviderKind::Salesforce, 2),
            cred("later", ProviderKind::Salesforce, 60),
            cred("other", ProviderKind::Hubspot, 2),
        ]);
        let due = store
            .list_expiring(ProviderKind::Salesforce, Utc::now() + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].user_id, "soon");
    }
}
