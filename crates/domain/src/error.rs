//! Shared error type used across every crate in this workspace.

/// The error kinds an agent run, context compaction, or tool dispatch can
/// fail with. Callers branch on these kinds rather than string-matching.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed or out-of-range input: bad tool arguments, a threshold
    /// outside `[0.5, 0.95]`, an unparseable config value.
    #[error("validation: {0}")]
    Validation(String),

    /// A path, tool, or action was denied by a sandbox or tool policy.
    #[error("permission: {0}")]
    Permission(String),

    /// The configured LLM provider returned an error or an unparseable response.
    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// A bounded operation (LLM call, subprocess, agent turn) exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// An internal invariant the runtime itself is responsible for upholding
    /// was violated — a bug, not bad input.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, Error::Permission(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
