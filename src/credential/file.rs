use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::CrmAuthError;
use crate::provider::ProviderKind;

use super::{sort_credentials, Credential, CredentialStore, CredentialUpdate};

pub fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".crmauth")
        .join("credentials.json")
}

/// Credentials kept in a single JSON file. Every write rewrites the file
/// through a temporary sibling and a rename.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<Credential>, CrmAuthError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&data).map_err(|e| {
            CrmAuthError::Store(format!("Cannot parse {}: {e}", self.path.display()))
        })
    }

    async fn write_all(&self, credentials: &mut Vec<Credential>) -> Result<(), CrmAuthError> {
        sort_credentials(credentials);
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_string_pretty(credentials)
            .map_err(|e| CrmAuthError::Store(format!("Failed to serialize credentials: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        write_private(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Write `data` to `path` readable by the owner only (0600 on unix).
async fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    // An existing file keeps its old mode through open.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
    }
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, user_id: &str, provider: ProviderKind) -> Result<Credential, CrmAuthError> {
        let _guard = self.lock.lock().await;
        self.read_all()
            .await?
            .into_iter()
            .find(|c| c.user_id == user_id && c.provider == provider)
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
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        let stored = all
            .iter_mut()
            .find(|c| c.user_id == credential.user_id && c.provider == credential.provider)
            .ok_or_else(|| CrmAuthError::CredentialNotFound {
                user_id: credential.user_id.clone(),
                provider: credential.provider,
            })?;
        *stored = stored.with_update(&fields);
        let updated = stored.clone();
        self.write_all(&mut all).await?;
        Ok(updated)
    }

    async fn upsert(&self, credential: Credential) -> Result<Credential, CrmAuthError> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        all.retain(|c| !(c.user_id == credential.user_id && c.provider == credential.provider));
        all.push(credential.clone());
        self.write_all(&mut all).await?;
        Ok(credential)
    }

    async fn list(&self, provider: Option<ProviderKind>) -> Result<Vec<Credential>, CrmAuthError> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        all.retain(|c| provider.map_or(true, |p| c.provider == p));
        sort_credentials(&mut all);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn default_path_structure() {
        let path = default_store_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.contains(".crmauth"));
        assert!(path_str.ends_with("credentials.json"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn store_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        // A pre-existing world-readable file is tightened on the next write.
        std::fs::write(&path, "[]").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        std::fs::write(path.with_extension("json.tmp"), "").unwrap();
        std::fs::set_permissions(path.with_extension("json.tmp"), std::fs::Permissions::from_mode(0o644))
            .unwrap();

        let store = FileCredentialStore::new(&path);
        store
            .upsert(Credential::new(
                "u",
                ProviderKind::Hubspot,
                "t",
                Some("r"),
                Utc::now() + Duration::hours(1),
            ))
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nope.json"));
        assert!(store.list(None).await.unwrap().is_empty());
        assert!(store.load("u", ProviderKind::Salesforce).await.is_err());
    }

    #[tokio::test]
    async fn upsert_update_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");
        let store = FileCredentialStore::new(&path);

        let c = Credential::new("u-1", ProviderKind::Hubspot, "T1", Some("R1"), Utc::now());
        store.upsert(c.clone()).await.unwrap();
        store
            .update(
                &c,
                CredentialUpdate {
                    token: "T2".into(),
                    expires_at: Utc::now() + Duration::hours(1),
                    refresh_token: Some("R2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // A second handle on the same file sees the write.
        let reopened = FileCredentialStore::new(&path);
        let loaded = reopened.load("u-1", ProviderKind::Hubspot).await.unwrap();
        assert_eq!(loaded.token, "T2");
        assert_eq!(loaded.refresh_token.as_deref(), Some("R2"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn upsert_replaces_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("c.json"));
        let first = Credential::new("u", ProviderKind::Salesforce, "A", None, Utc::now());
        let second = Credential::new("u", ProviderKind::Salesforce, "B", Some("R"), Utc::now());
        store.upsert(first).await.unwrap();
        store.upsert(second).await.unwrap();
        let all = store.list(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].token, "B");
    }

    #[tokio::test]
    async fn corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileCredentialStore::new(&path);
        let err = store.list(None).await.unwrap_err();
        assert!(matches!(err, CrmAuthError::Store(_)));
    }
}
