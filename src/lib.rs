pub mod api;
pub mod cli;
pub mod config;
pub mod credential;
pub mod error;
pub mod oauth;
pub mod provider;
pub mod refresh;
pub mod retry;
pub mod sweep;

pub use api::ProviderApi;
pub use config::{load_config, ClientCredentials, CrmAuthConfig};
pub use credential::{
    Credential, CredentialStore, CredentialUpdate, FileCredentialStore, MemoryCredentialStore,
};
pub use error::CrmAuthError;
pub use oauth::{PendingAuthorizations, TokenExchangeClient, TokenResult};
pub use provider::{ProviderKind, ProviderProfile};
pub use refresh::{needs_refresh, Refresher};
pub use retry::classify::{is_session_error, ErrorBody};
pub use sweep::{SweepOutcome, Sweeper};
