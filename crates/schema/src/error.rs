//! Schema error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Schema errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A schema document could not be compiled.
    #[error("invalid schema {name}: {message}")]
    InvalidSchema { name: String, message: String },

    /// A value did not match its schema.
    #[error(transparent)]
    Validation(#[from] SchemaValidationError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The lifecycle stage a schema is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Params,
    GrantedParams,
    Precheck,
    Evaluate,
    Execute,
    Commit,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Params => "params",
            Self::GrantedParams => "granted-params",
            Self::Precheck => "precheck",
            Self::Evaluate => "evaluate",
            Self::Execute => "execute",
            Self::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// A value did not match the schema registered for it.
///
/// This is an implementation bug in the ability or policy that produced the
/// value, not a business failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{schema} ({stage}) rejected value: {}", errors.join("; "))]
pub struct SchemaValidationError {
    pub schema: String,
    pub stage: Stage,
    pub errors: Vec<String>,
}
