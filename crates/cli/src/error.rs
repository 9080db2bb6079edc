//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The database file does not exist.
    ///
    /// This typically means nothing has been executed yet.
    #[error("database not found at {path}. Run 'agentkey execute' first")]
    DatabaseNotFound { path: PathBuf },

    /// No invocation was found matching the given prefix.
    #[error("no invocation found matching '{prefix}'")]
    InvocationNotFound { prefix: String },

    /// Multiple invocations match the given prefix.
    ///
    /// The user should provide a longer prefix to disambiguate.
    #[error("multiple invocations match '{prefix}': {matches:?}")]
    AmbiguousInvocation {
        prefix: String,
        matches: Vec<String>,
    },

    /// The request file is not a valid invocation request.
    #[error("invalid request {path}: {source}")]
    InvalidRequest {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The registry refused or could not answer a permission query.
    #[error("{error}. {remediation}")]
    Permission {
        error: chain::PermissionError,
        remediation: &'static str,
    },

    /// The invocation ran but did not finish `DONE`.
    #[error("invocation {stage}")]
    Unsuccessful { stage: runtime::Stage },

    /// Configuration is invalid or missing required fields.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred in the runtime layer.
    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    /// An error occurred in the storage layer.
    #[error(transparent)]
    Storage(#[from] storage::Error),

    /// An error occurred in the policy layer.
    #[error(transparent)]
    Policy(#[from] policy::Error),

    /// An error occurred reaching a node.
    #[error(transparent)]
    Chain(#[from] chain::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<chain::PermissionError> for Error {
    fn from(error: chain::PermissionError) -> Self {
        let remediation = error.remediation();
        Self::Permission { error, remediation }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
