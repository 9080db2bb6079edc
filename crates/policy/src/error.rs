//! Policy error types.

use thiserror::Error;

/// Policy errors.
///
/// These are registration-time errors. Evaluation never returns an error;
/// failures during evaluation become denials.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A policy schema failed to compile.
    #[error(transparent)]
    Schema(#[from] schema::Error),

    /// A parameter mapping names a parameter one side does not declare.
    #[error("invalid mapping for {policy}: {reason}")]
    InvalidMapping { policy: String, reason: String },

    /// No policy is registered under this identifier.
    #[error("unknown policy: {0}")]
    UnknownPolicy(String),
}

pub type Result<T> = std::result::Result<T, Error>;
