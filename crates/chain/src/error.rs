//! Chain client error types.

use crate::protocol::JsonRpcError;
use thiserror::Error;

/// Errors talking to a JSON-RPC endpoint.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("timeout waiting for response")]
    Timeout,

    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("ABI decoding failed: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("output too large: {size} bytes (max {max})")]
    OutputTooLarge { size: usize, max: usize },

    #[error("no network configured named {0}")]
    UnknownNetwork(String),
}

impl Error {
    /// The node's JSON-RPC error, if the call reached the node and failed
    /// there.
    pub fn as_json_rpc(&self) -> Option<&JsonRpcError> {
        match self {
            Self::JsonRpc(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
