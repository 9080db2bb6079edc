//! Swap an exact amount of one ERC-20 token for another through a
//! Uniswap V2 style router.
//!
//! Precheck confirms the delegator holds `buyAmount` of the input token and
//! has approved the router for it. Execute checks both again before sending
//! the swap, since a precheck can be stale by the time execution runs.

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use chain::{CallRequest, Provider};
use chrono::Utc;
use policy::{PolicyKind, PolicyRegistry};
use schema::{AbilityResult, ResultSchemas, Stage};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

use super::erc20::{IUniswapV2Router, TokenAmount, allowance, amount_schema, balance_of};
use super::{AbilityDefinition, AbilityEnv, outcomes, parse, schema};
use crate::Result;
use crate::transaction::{KeyHolder, Paymaster, TransactionSender};

pub const IDENTIFIER: &str = "@agentkey/ability-uniswap-swap";

const DEFAULT_DEADLINE_SECONDS: u64 = 600;
const MAX_DEADLINE_SECONDS: u64 = 365 * 24 * 60 * 60;

pub(crate) fn definition(policies: &PolicyRegistry) -> Result<AbilityDefinition> {
    let address = json!({ "type": "string", "pattern": "^0x[0-9a-fA-F]{40}$" });
    let params = schema(
        format!("{IDENTIFIER}/params"),
        json!({
            "type": "object",
            "properties": {
                "chain": { "type": "string", "minLength": 1 },
                "router": address,
                "tokenIn": address,
                "tokenOut": address,
                "tokenInDecimals": { "type": "integer", "minimum": 0, "maximum": 36 },
                "buyAmount": amount_schema(),
                "amountOutMin": { "type": "string", "pattern": "^[0-9]+$" },
                "deadlineSeconds": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_DEADLINE_SECONDS
                }
            },
            "required": ["chain", "router", "tokenIn", "tokenOut", "tokenInDecimals", "buyAmount"],
            "additionalProperties": false
        }),
    )?;

    let failure = json!({
        "type": "object",
        "properties": {
            "reason": { "type": "string" },
            "balance": { "type": "string" },
            "allowance": { "type": "string" },
            "required": { "type": "string" }
        },
        "required": ["reason"]
    });

    AbilityDefinition::new(
        IDENTIFIER,
        params,
        outcomes(
            IDENTIFIER,
            Stage::Precheck,
            json!({
                "type": "object",
                "properties": {
                    "balance": { "type": "string" },
                    "allowance": { "type": "string" },
                    "required": { "type": "string" }
                },
                "required": ["balance", "allowance", "required"]
            }),
            failure.clone(),
        )?,
        outcomes(
            IDENTIFIER,
            Stage::Execute,
            json!({
                "type": "object",
                "properties": {
                    "txHash": { "type": "string", "pattern": "^0x[0-9a-f]{64}$" },
                    "amountIn": { "type": "string" },
                    "amountOutMin": { "type": "string" }
                },
                "required": ["txHash", "amountIn", "amountOutMin"]
            }),
            failure,
        )?,
    )
    .with_policy(
        policies.require(PolicyKind::SpendingLimit)?,
        &[("buyAmount", "tokenInAmount")],
    )?
    .with_policy(
        policies.require(PolicyKind::ContractWhitelist)?,
        &[("chain", "chain"), ("router", "contractAddress")],
    )?
    .with_policy(policies.require(PolicyKind::RateLimit)?, &[])
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    router: Address,
    token_in: Address,
    token_out: Address,
    token_in_decimals: u8,
    buy_amount: TokenAmount,
    #[serde(default)]
    amount_out_min: Option<String>,
    #[serde(default)]
    deadline_seconds: Option<u64>,
}

struct Funds {
    balance: U256,
    allowance: U256,
}

impl Params {
    fn amount_in(&self) -> std::result::Result<U256, String> {
        self.buy_amount.to_units(self.token_in_decimals).ok_or_else(|| {
            format!(
                "{} has more than {} decimals",
                self.buy_amount, self.token_in_decimals
            )
        })
    }

    fn amount_out_min(&self) -> std::result::Result<U256, String> {
        match &self.amount_out_min {
            Some(min) => U256::from_str_radix(min, 10).map_err(|e| format!("invalid amountOutMin: {e}")),
            None => Ok(U256::ZERO),
        }
    }
}

/// Balance and router allowance must both cover `required`.
async fn check_funds<P: Provider>(
    schemas: &ResultSchemas,
    env: &AbilityEnv<'_, P>,
    params: &Params,
    required: U256,
) -> std::result::Result<Funds, AbilityResult> {
    let owner = env.context.delegator_key.address;
    let balance = balance_of(env.provider, params.token_in, owner)
        .await
        .map_err(|e| schemas.fail_runtime(format!("balance lookup failed: {e}")))?;
    let allowance = allowance(env.provider, params.token_in, owner, params.router)
        .await
        .map_err(|e| schemas.fail_runtime(format!("allowance lookup failed: {e}")))?;

    let reason = if balance < required {
        format!("Insufficient balance of {}", params.token_in)
    } else if allowance < required {
        format!("Router {} is not approved to spend {}", params.router, params.token_in)
    } else {
        return Ok(Funds { balance, allowance });
    };

    Err(schemas.fail(json!({
        "reason": reason,
        "balance": balance.to_string(),
        "allowance": allowance.to_string(),
        "required": required.to_string(),
    })))
}

pub(crate) async fn precheck<P: Provider>(
    schemas: &ResultSchemas,
    env: &AbilityEnv<'_, P>,
    params: &Map<String, Value>,
) -> AbilityResult {
    let params: Params = match parse(params) {
        Ok(params) => params,
        Err(e) => return schemas.fail_runtime(e),
    };
    let required = match params.amount_in() {
        Ok(required) => required,
        Err(e) => return schemas.fail_runtime(e),
    };

    match check_funds(schemas, env, &params, required).await {
        Ok(funds) => schemas.succeed(json!({
            "balance": funds.balance.to_string(),
            "allowance": funds.allowance.to_string(),
            "required": required.to_string(),
        })),
        Err(failed) => failed,
    }
}

pub(crate) async fn execute<P, K, M>(
    schemas: &ResultSchemas,
    env: &AbilityEnv<'_, P>,
    sender: &TransactionSender<K, M>,
    params: &Map<String, Value>,
) -> AbilityResult
where
    P: Provider,
    K: KeyHolder,
    M: Paymaster,
{
    let params: Params = match parse(params) {
        Ok(params) => params,
        Err(e) => return schemas.fail_runtime(e),
    };
    let (amount_in, amount_out_min) = match (params.amount_in(), params.amount_out_min()) {
        (Ok(amount_in), Ok(min)) => (amount_in, min),
        (Err(e), _) | (_, Err(e)) => return schemas.fail_runtime(e),
    };
    if let Err(failed) = check_funds(schemas, env, &params, amount_in).await {
        return failed;
    }

    let delegator = env.context.delegator_key.address;
    let Some(deadline) = Utc::now()
        .timestamp()
        .unsigned_abs()
        .checked_add(params.deadline_seconds.unwrap_or(DEFAULT_DEADLINE_SECONDS))
    else {
        return schemas.fail_runtime("deadlineSeconds puts the swap deadline out of range");
    };
    let data = IUniswapV2Router::swapExactTokensForTokensCall {
        amountIn: amount_in,
        amountOutMin: amount_out_min,
        path: vec![params.token_in, params.token_out],
        to: delegator,
        deadline: U256::from(deadline),
    }
    .abi_encode();
    let call = CallRequest::new(params.router, data);

    match sender.send(env.provider, &env.context.delegator_key, &call).await {
        Ok(hash) => {
            info!(
                router = %params.router,
                token_in = %params.token_in,
                token_out = %params.token_out,
                %amount_in,
                tx_hash = %hash,
                "Swap sent"
            );
            schemas.succeed(json!({
                "txHash": hash,
                "amountIn": amount_in.to_string(),
                "amountOutMin": amount_out_min.to_string(),
            }))
        }
        Err(e) => schemas.fail_runtime(e.to_string()),
    }
}
