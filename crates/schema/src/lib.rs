//! Schema registry and result algebra.
//!
//! Every stage of every ability and policy is bound to a JSON Schema. The
//! only way to produce a stage result is through the schemas registered for
//! that stage, so a result can never bypass validation.
//!
//! - [`Schema`]: a named, compiled JSON Schema.
//! - [`ResultSchemas`] / [`AbilityResult`]: `succeed` / `fail` for abilities.
//! - [`DecisionSchemas`] / [`PolicyResult`]: `allow` / `deny` for policies.
//! - [`ExecutionContext`]: who is invoking what, for one invocation.

mod context;
mod error;
mod result;
mod schema;

pub use context::{DelegatorKey, ExecutionContext};
pub use error::{Error, Result, SchemaValidationError, Stage};
pub use result::{AbilityResult, DecisionSchemas, PolicyResult, ResultSchemas};
pub use schema::Schema;
