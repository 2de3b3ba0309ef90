use std::path::{Path, PathBuf};

use crate::error::CrmAuthError;

use super::env::expand_config;
use super::types::CrmAuthConfig;

/// Candidate config files in precedence order (highest first).
///
/// Precedence:
/// 1. `--config` CLI flag
/// 2. `CRMAUTH_CONFIG` env var
/// 3. `./config/crmauth.json` (project-level)
/// 4. `~/.crmauth/crmauth.json` (home-level)
pub fn discover_config_files(cli_config: Option<&str>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = cli_config {
        candidates.push(PathBuf::from(path));
    }
    if let Ok(env_path) = std::env::var("CRMAUTH_CONFIG") {
        candidates.push(PathBuf::from(env_path));
    }
    candidates.push(PathBuf::from("./config/crmauth.json"));
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".crmauth").join("crmauth.json"));
    }

    let mut files = Vec::new();
    for p in candidates {
        if p.exists() && !files.contains(&p) {
            files.push(p);
        }
    }
    files
}

pub fn load_config_file(path: &Path) -> Result<CrmAuthConfig, CrmAuthError> {
    let content = std::fs::read_to_string(path).map_err(|e| CrmAuthError::ConfigError {
        path: path.to_path_buf(),
        detail: format!("Cannot read file: {e}"),
    })?;
    let config = serde_json::from_str::<CrmAuthConfig>(&content).map_err(|e| {
        CrmAuthError::ConfigError {
            path: path.to_path_buf(),
            detail: format!("Invalid JSON: {e}"),
        }
    })?;
    expand_config(&config)
}

/// Load the highest-precedence config file, or defaults when none exists.
///
/// An explicit `--config` path that does not exist is an error rather than a
/// silent fallback.
pub fn load_config(cli_config: Option<&str>) -> Result<CrmAuthConfig, CrmAuthError> {
    if let Some(path) = cli_config {
        let p = Path::new(path);
        if !p.exists() {
            return Err(CrmAuthError::ConfigError {
                path: p.to_path_buf(),
                detail: "File not found".into(),
            });
        }
    }
    match discover_config_files(cli_config).first() {
        Some(path) => {
            tracing::debug!("Loading config from {}", path.display());
            load_config_file(path)
        }
        None => {
            tracing::debug!("No config file found, using defaults");
            Ok(CrmAuthConfig::default())
        }
    }
}
