//! Configuration system for authbridge.
//!
//! Provides TOML-based configuration with:
//! - Listener, upstream and token cache settings (`[server]`, `[upstream]`, `[token_cache]`)
//! - Inbound token verification mode (`[inbound]`)
//! - Named OAuth2 client-credentials providers (`[providers.<name>]`)
//! - An ordered route table with per-route arbitration rules (`[[routes]]`)
//! - Config file layering (user config dir + project-local override)
//! - Client secret resolution (env var → config file)

pub mod discovery;
pub mod error;
pub mod secrets;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, config_dir, load_config, load_config_file,
    load_config_with_options, save_config, user_config_path, write_file,
};
pub use error::{ConfigError, Result};
pub use secrets::{ResolvedSecret, SecretSource, resolve_client_secret};
pub use types::*;
