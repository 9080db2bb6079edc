//! Running an ability's policies for one invocation.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use schema::{ExecutionContext, PolicyResult};
use serde::Serialize;
use serde_json::{Map, Value};
use storage::SpendLedger;
use tracing::{debug, info};

use crate::{CommitInput, PolicyEvaluation, PolicyEvaluationResult, PolicyInput, PolicySlot, Step};

/// Granted parameter values per policy identifier, as enabled on-chain.
pub type GrantedPolicies = IndexMap<String, Map<String, Value>>;

/// Outcome of one policy commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitRecord {
    pub identifier: String,
    #[serde(flatten)]
    pub result: PolicyResult,
}

/// The policies of one ability, bound to one invocation.
///
/// Only slots whose policy the app version enabled on-chain take part;
/// the rest are skipped. Slots run in declaration order.
pub struct PolicyPipeline<'a> {
    slots: &'a [PolicySlot],
    granted: &'a GrantedPolicies,
    context: &'a ExecutionContext,
    ledger: &'a SpendLedger,
}

impl<'a> PolicyPipeline<'a> {
    pub fn new(
        slots: &'a [PolicySlot],
        granted: &'a GrantedPolicies,
        context: &'a ExecutionContext,
        ledger: &'a SpendLedger,
    ) -> Self {
        Self {
            slots,
            granted,
            context,
            ledger,
        }
    }

    /// Granted policies the ability does not declare a slot for.
    pub fn unsupported(&self) -> Vec<&str> {
        self.granted
            .keys()
            .filter(|id| !self.slots.iter().any(|slot| slot.identifier() == id.as_str()))
            .map(String::as_str)
            .collect()
    }

    fn enabled(&self) -> impl Iterator<Item = (&'a PolicySlot, &'a Map<String, Value>)> + '_ {
        self.slots.iter().filter_map(|slot| {
            let granted = self.granted.get(slot.identifier());
            if granted.is_none() {
                debug!(policy = slot.identifier(), "Policy not enabled, skipping");
            }
            granted.map(|granted| (slot, granted))
        })
    }

    /// Run policy prechecks. Policies without a precheck are not recorded.
    pub fn precheck(&self, ability_params: &Map<String, Value>, now: DateTime<Utc>) -> PolicyEvaluationResult {
        self.run(ability_params, now, |slot, input| slot.policy().precheck(input))
    }

    /// Evaluate every enabled policy, stopping at the first denial.
    pub fn evaluate(&self, ability_params: &Map<String, Value>, now: DateTime<Utc>) -> PolicyEvaluationResult {
        self.run(ability_params, now, |slot, input| Some(slot.policy().evaluate(input)))
    }

    fn run(
        &self,
        ability_params: &Map<String, Value>,
        now: DateTime<Utc>,
        decide: impl Fn(&PolicySlot, &PolicyInput<'_>) -> Option<PolicyResult>,
    ) -> PolicyEvaluationResult {
        let mut evaluation = PolicyEvaluation::new();
        for (slot, granted) in self.enabled() {
            let params = slot.compose(ability_params);
            let input = PolicyInput {
                params: &params,
                granted,
                context: self.context,
                ledger: self.ledger,
                now,
            };
            let Some(result) = decide(slot, &input) else {
                continue;
            };

            info!(
                policy = slot.identifier(),
                allow = result.is_allowed(),
                "Policy decided"
            );
            evaluation = match evaluation.record(slot.identifier(), result) {
                Step::Continue(evaluation) => evaluation,
                Step::Denied(result) => return result,
            };
        }
        evaluation.finish()
    }

    /// Run commits for allowed policies that declare one, in evaluation
    /// order. A failed commit is recorded and does not stop the others.
    pub fn commit(
        &self,
        ability_params: &Map<String, Value>,
        evaluation: &PolicyEvaluationResult,
        execution: &Value,
        now: DateTime<Utc>,
    ) -> Vec<CommitRecord> {
        let mut records = Vec::new();
        for (slot, granted) in self.enabled() {
            let Some(allowed) = evaluation.allowed_policies().get(slot.identifier()) else {
                continue;
            };
            let Some(allow_payload) = allowed.result() else {
                continue;
            };

            let params = slot.compose(ability_params);
            let input = CommitInput {
                input: PolicyInput {
                    params: &params,
                    granted,
                    context: self.context,
                    ledger: self.ledger,
                    now,
                },
                evaluation: allow_payload,
                execution,
            };
            if let Some(result) = slot.policy().commit(&input) {
                info!(
                    policy = slot.identifier(),
                    allow = result.is_allowed(),
                    "Policy committed"
                );
                records.push(CommitRecord {
                    identifier: slot.identifier().to_string(),
                    result,
                });
            }
        }
        records
    }
}
