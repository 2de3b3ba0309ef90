pub mod env;
pub mod loader;
pub mod types;

pub use loader::{discover_config_files, load_config};
pub use types::{seconds_setting, ClientCredentials, CrmAuthConfig, StoreConfig, SweepConfig};
