//! Outcome of evaluating an ability's policies.

use indexmap::IndexMap;
use schema::{PolicyResult, SchemaValidationError};
use serde::Serialize;
use serde_json::Value;

/// The policy that stopped an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeniedPolicy {
    pub identifier: String,
    pub reason: String,
    /// Structured deny payload, e.g. the offending chain and contract.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_validation_error: Option<SchemaValidationError>,
}

impl DeniedPolicy {
    fn from_result(identifier: String, result: &PolicyResult) -> Self {
        Self {
            reason: result
                .reason()
                .unwrap_or_else(|| format!("denied by {identifier}")),
            identifier,
            result: result.result().cloned(),
            runtime_error: result.runtime_error().map(str::to_string),
            schema_validation_error: result.schema_validation_error().cloned(),
        }
    }
}

/// Result of a policy evaluation pass.
///
/// `allow == false` implies exactly one denied policy; `allow == true`
/// implies none, with every allowed policy among the evaluated ones.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvaluationResult {
    allow: bool,
    evaluated_policies: Vec<String>,
    allowed_policies: IndexMap<String, PolicyResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    denied_policy: Option<DeniedPolicy>,
}

impl PolicyEvaluationResult {
    pub fn is_allowed(&self) -> bool {
        self.allow
    }

    pub fn evaluated_policies(&self) -> &[String] {
        &self.evaluated_policies
    }

    pub fn allowed_policies(&self) -> &IndexMap<String, PolicyResult> {
        &self.allowed_policies
    }

    pub fn denied_policy(&self) -> Option<&DeniedPolicy> {
        self.denied_policy.as_ref()
    }
}

/// Whether evaluation should go on after recording a decision.
#[derive(Debug)]
pub enum Step {
    Continue(PolicyEvaluation),
    Denied(PolicyEvaluationResult),
}

/// An in-progress evaluation pass.
///
/// Decisions are recorded in evaluation order. The first denial ends the
/// pass; later policies are never recorded.
#[derive(Debug, Default)]
pub struct PolicyEvaluation {
    evaluated: Vec<String>,
    allowed: IndexMap<String, PolicyResult>,
}

impl PolicyEvaluation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(mut self, identifier: impl Into<String>, result: PolicyResult) -> Step {
        let identifier = identifier.into();
        self.evaluated.push(identifier.clone());

        if result.is_allowed() {
            self.allowed.insert(identifier, result);
            return Step::Continue(self);
        }

        Step::Denied(PolicyEvaluationResult {
            allow: false,
            evaluated_policies: self.evaluated,
            allowed_policies: self.allowed,
            denied_policy: Some(DeniedPolicy::from_result(identifier, &result)),
        })
    }

    /// Every recorded policy allowed.
    pub fn finish(self) -> PolicyEvaluationResult {
        PolicyEvaluationResult {
            allow: true,
            evaluated_policies: self.evaluated,
            allowed_policies: self.allowed,
            denied_policy: None,
        }
    }
}
