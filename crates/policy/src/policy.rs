//! Registered policies and their stage entry points.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use schema::{DecisionSchemas, ExecutionContext, PolicyResult, Stage};
use serde_json::{Map, Value};
use storage::SpendLedger;

use crate::builtin::{contract_whitelist, rate_limit, spending_limit};
use crate::{Error, PolicyDefinition, Result};

/// The built-in policies, one variant each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    SpendingLimit,
    ContractWhitelist,
    RateLimit,
}

impl PolicyKind {
    pub const ALL: [Self; 3] = [Self::SpendingLimit, Self::ContractWhitelist, Self::RateLimit];

    pub fn identifier(self) -> &'static str {
        match self {
            Self::SpendingLimit => spending_limit::IDENTIFIER,
            Self::ContractWhitelist => contract_whitelist::IDENTIFIER,
            Self::RateLimit => rate_limit::IDENTIFIER,
        }
    }

    fn definition(self) -> Result<PolicyDefinition> {
        match self {
            Self::SpendingLimit => spending_limit::definition(),
            Self::ContractWhitelist => contract_whitelist::definition(),
            Self::RateLimit => rate_limit::definition(),
        }
    }
}

/// What a policy sees when it runs.
#[derive(Clone, Copy)]
pub struct PolicyInput<'a> {
    /// Ability parameters projected through the slot's mapping.
    pub params: &'a Map<String, Value>,
    /// Values the delegator granted on-chain.
    pub granted: &'a Map<String, Value>,
    pub context: &'a ExecutionContext,
    pub ledger: &'a SpendLedger,
    pub now: DateTime<Utc>,
}

/// What a policy sees when it commits.
#[derive(Clone, Copy)]
pub struct CommitInput<'a> {
    pub input: PolicyInput<'a>,
    /// The policy's own evaluate-allow payload.
    pub evaluation: &'a Value,
    /// The ability's execute-success payload.
    pub execution: &'a Value,
}

/// A policy definition bound to its behavior.
#[derive(Debug)]
pub struct Policy {
    kind: PolicyKind,
    definition: PolicyDefinition,
}

impl Policy {
    pub fn builtin(kind: PolicyKind) -> Result<Self> {
        Ok(Self {
            kind,
            definition: kind.definition()?,
        })
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    pub fn identifier(&self) -> &str {
        self.definition.identifier()
    }

    pub fn definition(&self) -> &PolicyDefinition {
        &self.definition
    }

    /// Run the policy precheck, if the policy declares one.
    pub fn precheck(&self, input: &PolicyInput<'_>) -> Option<PolicyResult> {
        let schemas = self.definition.precheck()?;
        if let Err(denied) = self.check_inputs(schemas, input) {
            return Some(denied);
        }
        Some(match self.kind {
            PolicyKind::SpendingLimit => spending_limit::evaluate(schemas, input),
            PolicyKind::ContractWhitelist => contract_whitelist::evaluate(schemas, input),
            PolicyKind::RateLimit => rate_limit::evaluate(schemas, input),
        })
    }

    pub fn evaluate(&self, input: &PolicyInput<'_>) -> PolicyResult {
        let schemas = self.definition.evaluate();
        if let Err(denied) = self.check_inputs(schemas, input) {
            return denied;
        }
        match self.kind {
            PolicyKind::SpendingLimit => spending_limit::evaluate(schemas, input),
            PolicyKind::ContractWhitelist => contract_whitelist::evaluate(schemas, input),
            PolicyKind::RateLimit => rate_limit::evaluate(schemas, input),
        }
    }

    /// Run the post-execution side effect, if the policy declares one.
    pub fn commit(&self, input: &CommitInput<'_>) -> Option<PolicyResult> {
        let schemas = self.definition.commit()?;
        match self.kind {
            PolicyKind::SpendingLimit => Some(spending_limit::commit(schemas, input)),
            PolicyKind::RateLimit => Some(rate_limit::commit(schemas, input)),
            PolicyKind::ContractWhitelist => None,
        }
    }

    fn check_inputs(
        &self,
        schemas: &DecisionSchemas,
        input: &PolicyInput<'_>,
    ) -> std::result::Result<(), PolicyResult> {
        self.definition
            .params()
            .check(Stage::Params, &Value::Object(input.params.clone()))
            .map_err(|e| schemas.deny_invalid(e))?;
        self.definition
            .granted()
            .check(Stage::GrantedParams, &Value::Object(input.granted.clone()))
            .map_err(|e| schemas.deny_invalid(e))
    }
}

/// Process-wide set of registered policies, read-only after construction.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    policies: IndexMap<String, Arc<Policy>>,
}

impl PolicyRegistry {
    /// Register every built-in policy.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::default();
        for kind in PolicyKind::ALL {
            registry.register(Policy::builtin(kind)?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, policy: Policy) {
        self.policies
            .insert(policy.identifier().to_string(), Arc::new(policy));
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<Policy>> {
        self.policies.get(identifier).cloned()
    }

    pub fn require(&self, kind: PolicyKind) -> Result<Arc<Policy>> {
        self.get(kind.identifier())
            .ok_or_else(|| Error::UnknownPolicy(kind.identifier().to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Policy>> {
        self.policies.values()
    }
}
