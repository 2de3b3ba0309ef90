use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CrmAuthError;
use crate::provider::ProviderKind;
use crate::sweep::DEFAULT_SWEEP_CONCURRENCY;

pub const DEFAULT_REFRESH_BUFFER_SECS: u64 = 300;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_SWEEP_THRESHOLD_SECS: u64 = 300;
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 30 * 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmAuthConfig {
    #[serde(default)]
    pub providers: HashMap<ProviderKind, ClientCredentials>,
    #[serde(default = "default_refresh_buffer")]
    pub refresh_buffer_secs: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for CrmAuthConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            refresh_buffer_secs: DEFAULT_REFRESH_BUFFER_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            sweep: SweepConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl CrmAuthConfig {
    pub fn refresh_buffer(&self) -> Result<chrono::Duration, CrmAuthError> {
        seconds_setting("refreshBufferSecs", self.refresh_buffer_secs)
    }

    pub fn sweep_threshold(&self) -> Result<chrono::Duration, CrmAuthError> {
        seconds_setting("sweep.thresholdSecs", self.sweep.threshold_secs)
    }

    /// Period between daemon sweeps. Zero is treated as one second.
    pub fn sweep_interval(&self) -> Result<Duration, CrmAuthError> {
        let secs = self.sweep.interval_secs.max(1);
        if secs > MAX_SWEEP_INTERVAL_SECS {
            return Err(CrmAuthError::ConfigError {
                path: PathBuf::from("<config>"),
                detail: format!(
                    "sweep.intervalSecs value {secs} exceeds {MAX_SWEEP_INTERVAL_SECS}"
                ),
            });
        }
        Ok(Duration::from_secs(secs))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn provider(&self, kind: ProviderKind) -> Option<&ClientCredentials> {
        self.providers.get(&kind)
    }
}

/// OAuth client registration for one provider.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCredentials {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    /// Overrides the provider's default scopes when non-empty.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_sweep_threshold")]
    pub threshold_secs: u64,
    /// Refreshes in flight at once within one provider sweep.
    #[serde(default = "default_sweep_concurrency")]
    pub concurrency: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            threshold_secs: DEFAULT_SWEEP_THRESHOLD_SECS,
            concurrency: DEFAULT_SWEEP_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Convert a seconds setting into a `chrono::Duration`, rejecting values
/// chrono cannot represent.
pub fn seconds_setting(name: &str, secs: u64) -> Result<chrono::Duration, CrmAuthError> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| CrmAuthError::ConfigError {
            path: PathBuf::from("<config>"),
            detail: format!("{name} value {secs} is out of range"),
        })
}

fn default_refresh_buffer() -> u64 {
    DEFAULT_REFRESH_BUFFER_SECS
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_sweep_threshold() -> u64 {
    DEFAULT_SWEEP_THRESHOLD_SECS
}

fn default_sweep_concurrency() -> usize {
    DEFAULT_SWEEP_CONCURRENCY
}
