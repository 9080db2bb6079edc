//! Caps the USD value an app may spend for a delegator within a window.
//!
//! Evaluation compares the requested amount plus everything already spent in
//! the window against the limit the delegator granted. Commit records the
//! amount once the ability has executed.

use schema::{DecisionSchemas, PolicyResult, Stage};
use serde_json::{Value, json};
use storage::LedgerKey;
use tracing::{info, warn};

use super::{decisions, schema, window_start};
use crate::{CommitInput, PolicyDefinition, PolicyInput, Result};

pub const IDENTIFIER: &str = "@agentkey/policy-spending-limit";

const SCOPE: &str = "spending-limit";
const DEFAULT_WINDOW_SECONDS: u64 = 24 * 60 * 60;

pub(crate) fn definition() -> Result<PolicyDefinition> {
    let params = schema(
        format!("{IDENTIFIER}/params"),
        json!({
            "type": "object",
            "properties": {
                "tokenInAmount": {
                    "type": ["string", "number"],
                    "pattern": "^[0-9]+(\\.[0-9]+)?$",
                    "exclusiveMinimum": 0
                }
            },
            "required": ["tokenInAmount"],
            "additionalProperties": false
        }),
    )?;
    let granted = schema(
        format!("{IDENTIFIER}/granted"),
        json!({
            "type": "object",
            "properties": {
                "maxDailySpendUsd": { "type": "number", "minimum": 0 },
                "windowSeconds": { "type": "integer", "minimum": 1 }
            },
            "required": ["maxDailySpendUsd"]
        }),
    )?;

    let allow = json!({
        "type": "object",
        "properties": {
            "limit": { "type": "number" },
            "spent": { "type": "number" },
            "requested": { "type": "number" },
            "remaining": { "type": "number" }
        },
        "required": ["limit", "spent", "requested", "remaining"]
    });
    let deny = json!({
        "type": "object",
        "properties": {
            "reason": { "type": "string" },
            "limit": { "type": "number" },
            "spent": { "type": "number" },
            "requested": { "type": "number" }
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
            "properties": {
                "recorded": { "type": "number" },
                "spentInWindow": { "type": "number" }
            },
            "required": ["recorded", "spentInWindow"]
        }),
        json!({
            "type": "object",
            "properties": { "reason": { "type": "string" } },
            "required": ["reason"]
        }),
    )?))
}

struct Terms {
    requested: f64,
    limit: f64,
    window: u64,
}

fn terms(input: &PolicyInput<'_>) -> Option<Terms> {
    Some(Terms {
        requested: amount(input.params.get("tokenInAmount")?)?,
        limit: input.granted.get("maxDailySpendUsd")?.as_f64()?,
        window: input
            .granted
            .get("windowSeconds")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_WINDOW_SECONDS),
    })
}

/// USD value of an amount given as a JSON number or decimal string.
fn amount(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::String(text) => text.parse().ok()?,
        other => other.as_f64()?,
    };
    (amount.is_finite() && amount > 0.0).then_some(amount)
}

fn ledger_key(input: &PolicyInput<'_>) -> LedgerKey {
    LedgerKey::new(
        input.context.delegator_key.address.to_string(),
        input.context.app_id,
        SCOPE,
    )
}

pub(crate) fn evaluate(schemas: &DecisionSchemas, input: &PolicyInput<'_>) -> PolicyResult {
    let Some(terms) = terms(input) else {
        return schemas.deny_runtime("spending limit terms are missing");
    };

    let since = window_start(input.now, terms.window);
    let spent = match input.ledger.total_since(&ledger_key(input), since) {
        Ok(spent) => spent,
        Err(e) => return schemas.deny_runtime(format!("failed to read spend ledger: {e}")),
    };

    if spent + terms.requested > terms.limit {
        warn!(
            delegator = %input.context.delegator_key.address,
            app_id = input.context.app_id,
            spent,
            requested = terms.requested,
            limit = terms.limit,
            "Spend would exceed limit"
        );
        return schemas.deny(json!({
            "reason": format!(
                "Attempted spend of ${} would exceed the spending limit of ${} \
                 (${} already spent in the last {}s)",
                terms.requested, terms.limit, spent, terms.window
            ),
            "limit": terms.limit,
            "spent": spent,
            "requested": terms.requested,
        }));
    }

    schemas.allow(json!({
        "limit": terms.limit,
        "spent": spent,
        "requested": terms.requested,
        "remaining": terms.limit - spent - terms.requested,
    }))
}

pub(crate) fn commit(schemas: &DecisionSchemas, commit: &CommitInput<'_>) -> PolicyResult {
    let input = &commit.input;
    let Some(terms) = terms(input) else {
        return schemas.deny_runtime("spending limit terms are missing");
    };

    let key = ledger_key(input);
    let recorded = input
        .ledger
        .record(&key, terms.requested, input.now)
        .and_then(|()| {
            input
                .ledger
                .total_since(&key, window_start(input.now, terms.window))
        });

    match recorded {
        Ok(spent) => {
            info!(
                delegator = %input.context.delegator_key.address,
                app_id = input.context.app_id,
                amount = terms.requested,
                spent,
                "Spend committed"
            );
            schemas.allow(json!({ "recorded": terms.requested, "spentInWindow": spent }))
        }
        Err(e) => schemas.deny_runtime(format!("failed to record spend: {e}")),
    }
}
