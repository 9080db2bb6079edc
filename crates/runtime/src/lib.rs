//! Agentkey runtime: runs abilities on behalf of delegator keys.
//!
//! An [`Executor`] takes an [`InvocationRequest`] through the execution
//! protocol: parameter validation, the ability's precheck, the on-chain
//! permission check, policy evaluation, execution and policy commit. Every
//! outcome, including denials and failures, comes back as an
//! [`InvocationResponse`].
//!
//! # Overview
//!
//! - **Ability**: a unit of on-chain work with schema-typed parameters and
//!   results, e.g. an ERC-20 transfer.
//! - **Policy**: a rule the delegator grants on-chain, bound to an ability's
//!   parameters through its slots.
//! - **TransactionSender**: assembles, corrects, signs and broadcasts
//!   transactions, or routes them through a gas sponsor.
//!
//! # Example
//!
//! ```no_run
//! use chain::{Networks, PermissionValidator, RpcProvider};
//! use policy::PolicyRegistry;
//! use runtime::ability::AbilityRegistry;
//! use runtime::transaction::{LazyKeyHolder, PaymasterClient, TransactionSender};
//! use runtime::{Executor, InvocationRequest};
//! use storage::{EventStore, SpendLedger};
//!
//! # async fn example(request: InvocationRequest) -> runtime::Result<()> {
//! let policies = PolicyRegistry::builtin()?;
//! let abilities = AbilityRegistry::builtin(&policies)?;
//! let networks = Networks::new().with("base", RpcProvider::new("https://mainnet.base.org")?);
//! let registry = RpcProvider::new("https://yellowstone-rpc.example")?;
//! let permissions = PermissionValidator::new(registry, "0x0000000000000000000000000000000000000001".parse().unwrap());
//! let sender: TransactionSender<_, PaymasterClient> =
//!     TransactionSender::new(LazyKeyHolder::new("http://127.0.0.1:7400"));
//!
//! let executor = Executor::new(
//!     abilities,
//!     networks,
//!     permissions,
//!     sender,
//!     EventStore::in_memory()?,
//!     SpendLedger::in_memory()?,
//! );
//! let response = executor.execute(request).await;
//! println!("{}", serde_json::to_string_pretty(&response).unwrap());
//! # Ok(())
//! # }
//! ```

pub mod ability;
mod error;
mod protocol;
pub mod transaction;

#[cfg(test)]
mod testing;

pub use ability::{Ability, AbilityDefinition, AbilityKind, AbilityRegistry};
pub use error::{Error, Result};
pub use protocol::{Executor, InvocationContext, InvocationRequest, InvocationResponse, Stage};
