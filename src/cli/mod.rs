pub mod output;
pub mod status;

use std::sync::Arc;

use crate::config::CrmAuthConfig;
use crate::credential::file::default_store_path;
use crate::credential::{CredentialStore, FileCredentialStore};
use crate::error::CrmAuthError;
use crate::refresh::Refresher;

/// The file store named by the config, or the default under `~/.crmauth`.
pub fn open_store(config: &CrmAuthConfig) -> Arc<dyn CredentialStore> {
    let path = config
        .store
        .path
        .clone()
        .unwrap_or_else(default_store_path);
    tracing::debug!("Using credential store {}", path.display());
    Arc::new(FileCredentialStore::new(path))
}

pub fn build_refresher(config: &CrmAuthConfig) -> Result<Refresher, CrmAuthError> {
    Refresher::from_config(config, open_store(config))
}
