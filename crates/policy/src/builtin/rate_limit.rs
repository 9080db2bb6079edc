//! Limits how many times an ability may execute for a delegator and app
//! within a window.
//!
//! Takes no ability parameters: it evaluates only the granted terms and the
//! execution count in the ledger.

use schema::{DecisionSchemas, PolicyResult, Stage};
use serde_json::{Value, json};
use storage::LedgerKey;
use tracing::{debug, warn};

use super::{decisions, schema, window_start};
use crate::{CommitInput, PolicyDefinition, PolicyInput, Result};

pub const IDENTIFIER: &str = "@agentkey/policy-rate-limit";

pub(crate) fn definition() -> Result<PolicyDefinition> {
    let params = schema(
        format!("{IDENTIFIER}/params"),
        json!({ "type": "object", "properties": {}, "additionalProperties": false }),
    )?;
    let granted = schema(
        format!("{IDENTIFIER}/granted"),
        json!({
            "type": "object",
            "properties": {
                "maxExecutions": { "type": "integer", "minimum": 1 },
                "windowSeconds": { "type": "integer", "minimum": 1 }
            },
            "required": ["maxExecutions", "windowSeconds"]
        }),
    )?;

    let allow = json!({
        "type": "object",
        "properties": {
            "executionsInWindow": { "type": "integer" },
            "maxExecutions": { "type": "integer" }
        },
        "required": ["executionsInWindow", "maxExecutions"]
    });
    let deny = json!({
        "type": "object",
        "properties": {
            "reason": { "type": "string" },
            "executionsInWindow": { "type": "integer" },
            "maxExecutions": { "type": "integer" },
            "windowSeconds": { "type": "integer" }
        },
        "required": ["reason"]
    });

    Ok(PolicyDefinition::new(
        IDENTIFIER,
        params,
        granted,
        decisions(IDENTIFIER, Stage::Evaluate, allow.clone(), deny.clone())?,
    )
    .with_precheck(decisions(IDENTIFIER, Stage::Precheck, allow, deny)?)
    .with_commit(decisions(
        IDENTIFIER,
        Stage::Commit,
        json!({
            "type": "object",
            "properties": { "executionsInWindow": { "type": "integer" } },
            "required": ["executionsInWindow"]
        }),
        json!({
            "type": "object",
            "properties": { "reason": { "type": "string" } },
            "required": ["reason"]
        }),
    )?))
}

fn ledger_key(input: &PolicyInput<'_>) -> LedgerKey {
    LedgerKey::new(
        input.context.delegator_key.address.to_string(),
        input.context.app_id,
        format!("rate-limit:{}", input.context.ability_identifier),
    )
}

fn terms(input: &PolicyInput<'_>) -> Option<(u64, u64)> {
    let max = input.granted.get("maxExecutions").and_then(Value::as_u64)?;
    let window = input.granted.get("windowSeconds").and_then(Value::as_u64)?;
    Some((max, window))
}

pub(crate) fn evaluate(schemas: &DecisionSchemas, input: &PolicyInput<'_>) -> PolicyResult {
    let Some((max, window)) = terms(input) else {
        return schemas.deny_runtime("rate limit terms are missing");
    };

    let count = match input
        .ledger
        .count_since(&ledger_key(input), window_start(input.now, window))
    {
        Ok(count) => count,
        Err(e) => return schemas.deny_runtime(format!("failed to read execution count: {e}")),
    };

    if count >= max {
        warn!(
            ability = %input.context.ability_identifier,
            count,
            max,
            "Rate limit reached"
        );
        return schemas.deny(json!({
            "reason": format!("Rate limit of {max} executions per {window}s reached"),
            "executionsInWindow": count,
            "maxExecutions": max,
            "windowSeconds": window,
        }));
    }

    schemas.allow(json!({ "executionsInWindow": count, "maxExecutions": max }))
}

pub(crate) fn commit(schemas: &DecisionSchemas, commit: &CommitInput<'_>) -> PolicyResult {
    let input = &commit.input;
    let Some((_, window)) = terms(input) else {
        return schemas.deny_runtime("rate limit terms are missing");
    };

    let key = ledger_key(input);
    let counted = input
        .ledger
        .record(&key, 1.0, input.now)
        .and_then(|()| input.ledger.count_since(&key, window_start(input.now, window)));

    match counted {
        Ok(count) => {
            debug!(ability = %input.context.ability_identifier, count, "Execution counted");
            schemas.allow(json!({ "executionsInWindow": count }))
        }
        Err(e) => schemas.deny_runtime(format!("failed to record execution: {e}")),
    }
}
