//! CLI command handlers.

pub mod config;
pub mod decode;
pub mod serve;
pub mod token;

use std::path::PathBuf;

use anyhow::Result;
use authbridge_config::LoadedConfig;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Explicit config file; skips discovery.
    pub config_path: Option<PathBuf>,
}

impl Context {
    /// Load the explicit config file, or discover and merge the layered ones.
    pub fn load_config(&self) -> Result<LoadedConfig> {
        let loaded = match self.config_path {
            Some(ref path) => LoadedConfig::from_file(path)?,
            None => authbridge_config::load_config(None)?,
        };
        Ok(loaded)
    }
}
