//! Configuration error types.

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to write a config file.
    #[error("failed to write config file '{path}': {source}")]
    WriteFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to serialize config.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A route references a provider that is not configured.
    #[error("provider '{name}' not found (referenced by route '{route}')")]
    ProviderNotFound { name: String, route: String },

    /// Missing required field.
    #[error("missing required field '{field}' in {context}")]
    MissingField { field: String, context: String },

    /// A field has a value that cannot be used.
    #[error("invalid value for '{field}' in {context}: {reason}")]
    InvalidField {
        field: String,
        context: String,
        reason: String,
    },

    /// Client secret not found through any resolution method.
    #[error(
        "client secret not found for provider '{provider}'. Set env var {env_var} or client_secret in the config file"
    )]
    SecretNotFound { provider: String, env_var: String },
}

impl ConfigError {
    pub(crate) fn invalid(
        field: impl Into<String>,
        context: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            field: field.into(),
            context: context.into(),
            reason: reason.into(),
        }
    }
}
