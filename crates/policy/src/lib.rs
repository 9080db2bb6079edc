//! Policy composition and evaluation.
//!
//! A policy gates an ability: it allows or denies each invocation, and may
//! commit a side effect (a ledger entry) once the ability has executed.
//!
//! - [`PolicyDefinition`]: the schemas a policy declares.
//! - [`Policy`] / [`PolicyKind`]: built-in policies as tagged variants.
//! - [`PolicySlot`]: a policy bound to an ability through a parameter
//!   mapping.
//! - [`PolicyPipeline`]: precheck, evaluate and commit an ability's
//!   policies for one invocation.

pub mod builtin;
mod definition;
mod error;
mod evaluation;
mod pipeline;
mod policy;
mod slot;

pub use definition::PolicyDefinition;
pub use error::{Error, Result};
pub use evaluation::{DeniedPolicy, PolicyEvaluation, PolicyEvaluationResult, Step};
pub use pipeline::{CommitRecord, GrantedPolicies, PolicyPipeline};
pub use policy::{CommitInput, Policy, PolicyInput, PolicyKind, PolicyRegistry};
pub use slot::PolicySlot;
