//! Error types for route building and credential arbitration.

/// A route definition that cannot be turned into a policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("route '{route}': invalid header name '{header}'")]
    InvalidHeader { route: String, header: String },

    #[error("route '{route}': {reason}")]
    Invalid { route: String, reason: String },
}

/// Why the outbound credential set could not be arbitrated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArbitrationError {
    /// The caller's credential must survive, the next hop needs its own, and there is
    /// nowhere to put the caller's.
    #[error(
        "route '{route}' needs a downstream credential in Authorization but must preserve the \
         caller's credential and has no relocation header"
    )]
    CredentialConflict { route: String },

    #[error("route '{route}' requires a caller Authorization header")]
    MissingCallerCredential { route: String },

    #[error("request carries more than one Authorization header")]
    MultipleAuthorizationHeaders,

    #[error("{header}: {reason}")]
    SecondaryCredential {
        header: String,
        scheme: Option<String>,
        reason: String,
    },

    #[error("route '{route}' requires a downstream token but none was supplied")]
    MissingDownstreamToken { route: String },

    #[error("cannot encode header {header}: {reason}")]
    InvalidHeaderValue { header: String, reason: String },
}
