//! EVM chain access for the execution kernel.
//!
//! - [`HttpTransport`]: JSON-RPC 2.0 over HTTP, one attempt per call.
//! - [`Provider`] / [`RpcProvider`]: the node calls the kernel needs
//!   (fees, nonce, gas estimation, `eth_call`, broadcast).
//! - [`PermissionValidator`]: the delegation registry, decoded into
//!   [`Delegation`]s or typed [`PermissionError`]s.
//!
//! # Example
//!
//! ```no_run
//! use alloy_primitives::{Address, U256};
//! use chain::{PermissionQuery, PermissionValidator, RpcProvider};
//!
//! # async fn example() -> chain::Result<()> {
//! let provider = RpcProvider::new("https://yellowstone-rpc.litprotocol.com")?;
//! let validator = PermissionValidator::new(provider, Address::ZERO);
//!
//! let query = PermissionQuery {
//!     delegatee: Address::ZERO,
//!     token_id: U256::from(42),
//!     ability: "@agentkey/ability-erc20-transfer".to_string(),
//!     app_id: 7,
//!     app_version: 2,
//! };
//! match validator.validate(&query).await {
//!     Ok(delegation) => println!("{} policies granted", delegation.policies.len()),
//!     Err(e) => println!("{e}: {}", e.remediation()),
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod permission;
mod protocol;
mod provider;
pub mod registry;
mod transport;

pub use error::{Error, Result};
pub use permission::{Delegation, PermissionError, PermissionQuery, PermissionValidator};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use provider::{CallRequest, FeeEstimate, Networks, Provider, RpcProvider};
pub use transport::{DEFAULT_TIMEOUT, HttpTransport, MAX_OUTPUT_SIZE};
