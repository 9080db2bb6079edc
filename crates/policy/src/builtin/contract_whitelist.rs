//! Restricts which contracts an ability may touch, per chain.
//!
//! Whitelist entries take the form `<chain>:<address>`; either side may be
//! `*`. Addresses compare case-insensitively.

use schema::{DecisionSchemas, PolicyResult, Stage};
use serde_json::{Value, json};
use tracing::warn;

use super::{decisions, schema};
use crate::{PolicyDefinition, PolicyInput, Result};

pub const IDENTIFIER: &str = "@agentkey/policy-contract-whitelist";

pub(crate) fn definition() -> Result<PolicyDefinition> {
    let params = schema(
        format!("{IDENTIFIER}/params"),
        json!({
            "type": "object",
            "properties": {
                "chain": { "type": "string", "minLength": 1 },
                "contractAddress": { "type": "string", "pattern": "^0x[0-9a-fA-F]{40}$" }
            },
            "required": ["chain", "contractAddress"],
            "additionalProperties": false
        }),
    )?;
    let granted = schema(
        format!("{IDENTIFIER}/granted"),
        json!({
            "type": "object",
            "properties": {
                "whitelist": {
                    "type": "array",
                    "items": { "type": "string", "pattern": "^[^:]+:(\\*|0x[0-9a-fA-F]{40})$" }
                }
            },
            "required": ["whitelist"]
        }),
    )?;

    Ok(PolicyDefinition::new(
        IDENTIFIER,
        params,
        granted,
        decisions(
            IDENTIFIER,
            Stage::Evaluate,
            json!({
                "type": "object",
                "properties": { "matchedEntry": { "type": "string" } },
                "required": ["matchedEntry"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "reason": { "type": "string" },
                    "chain": { "type": "string" },
                    "contractAddress": { "type": "string" }
                },
                "required": ["reason", "chain", "contractAddress"]
            }),
        )?,
    ))
}

fn matches(entry: &str, chain: &str, contract: &str) -> bool {
    let Some((entry_chain, entry_contract)) = entry.split_once(':') else {
        return false;
    };
    (entry_chain == "*" || entry_chain.eq_ignore_ascii_case(chain))
        && (entry_contract == "*" || entry_contract.eq_ignore_ascii_case(contract))
}

pub(crate) fn evaluate(schemas: &DecisionSchemas, input: &PolicyInput<'_>) -> PolicyResult {
    let chain = input.params.get("chain").and_then(Value::as_str);
    let contract = input.params.get("contractAddress").and_then(Value::as_str);
    let (Some(chain), Some(contract)) = (chain, contract) else {
        return schemas.deny_runtime("chain and contract address are required");
    };

    let whitelist = input
        .granted
        .get("whitelist")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(Value::as_str).collect::<Vec<_>>())
        .unwrap_or_default();

    match whitelist.iter().find(|entry| matches(entry, chain, contract)) {
        Some(entry) => schemas.allow(json!({ "matchedEntry": entry })),
        None => {
            warn!(chain, contract, "Contract not whitelisted");
            schemas.deny(json!({
                "reason": format!("Contract {contract} on {chain} is not whitelisted"),
                "chain": chain,
                "contractAddress": contract,
            }))
        }
    }
}
