//! Transfer an ERC-20 token from the delegator key.

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use chain::{CallRequest, Provider};
use policy::{PolicyKind, PolicyRegistry};
use schema::{AbilityResult, ResultSchemas, Stage};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

use super::erc20::{IERC20, TokenAmount, amount_schema, balance_of};
use super::{AbilityDefinition, AbilityEnv, outcomes, parse, schema};
use crate::Result;
use crate::transaction::{KeyHolder, Paymaster, TransactionSender};

pub const IDENTIFIER: &str = "@agentkey/ability-erc20-transfer";

pub(crate) fn definition(policies: &PolicyRegistry) -> Result<AbilityDefinition> {
    let params = schema(
        format!("{IDENTIFIER}/params"),
        json!({
            "type": "object",
            "properties": {
                "chain": { "type": "string", "minLength": 1 },
                "token": { "type": "string", "pattern": "^0x[0-9a-fA-F]{40}$" },
                "to": { "type": "string", "pattern": "^0x[0-9a-fA-F]{40}$" },
                "amount": amount_schema(),
                "decimals": { "type": "integer", "minimum": 0, "maximum": 36 }
            },
            "required": ["chain", "token", "to", "amount", "decimals"],
            "additionalProperties": false
        }),
    )?;

    let balance_check = json!({
        "type": "object",
        "properties": {
            "balance": { "type": "string" },
            "required": { "type": "string" }
        },
        "required": ["balance", "required"]
    });
    let failure = json!({
        "type": "object",
        "properties": {
            "reason": { "type": "string" },
            "balance": { "type": "string" },
            "required": { "type": "string" }
        },
        "required": ["reason"]
    });

    AbilityDefinition::new(
        IDENTIFIER,
        params,
        outcomes(IDENTIFIER, Stage::Precheck, balance_check, failure.clone())?,
        outcomes(
            IDENTIFIER,
            Stage::Execute,
            json!({
                "type": "object",
                "properties": {
                    "txHash": { "type": "string", "pattern": "^0x[0-9a-f]{64}$" },
                    "amount": { "type": "string" }
                },
                "required": ["txHash", "amount"]
            }),
            failure,
        )?,
    )
    .with_policy(
        policies.require(PolicyKind::SpendingLimit)?,
        &[("amount", "tokenInAmount")],
    )?
    .with_policy(
        policies.require(PolicyKind::ContractWhitelist)?,
        &[("chain", "chain"), ("token", "contractAddress")],
    )?
    .with_policy(policies.require(PolicyKind::RateLimit)?, &[])
}

#[derive(Deserialize)]
struct Params {
    token: Address,
    to: Address,
    amount: TokenAmount,
    decimals: u8,
}

impl Params {
    fn base_units(&self) -> std::result::Result<U256, String> {
        self.amount
            .to_units(self.decimals)
            .ok_or_else(|| format!("{} has more than {} decimals", self.amount, self.decimals))
    }
}

/// Balance check shared by precheck and execute. Returns the balance when it
/// covers `required`.
async fn check_balance<P: Provider>(
    schemas: &ResultSchemas,
    env: &AbilityEnv<'_, P>,
    params: &Params,
    required: U256,
) -> std::result::Result<U256, AbilityResult> {
    let owner = env.context.delegator_key.address;
    let balance = balance_of(env.provider, params.token, owner)
        .await
        .map_err(|e| schemas.fail_runtime(format!("balance lookup failed: {e}")))?;

    if balance < required {
        return Err(schemas.fail(json!({
            "reason": format!("Insufficient balance of {}", params.token),
            "balance": balance.to_string(),
            "required": required.to_string(),
        })));
    }
    Ok(balance)
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
    let required = match params.base_units() {
        Ok(required) => required,
        Err(e) => return schemas.fail_runtime(e),
    };

    match check_balance(schemas, env, &params, required).await {
        Ok(balance) => schemas.succeed(json!({
            "balance": balance.to_string(),
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
    let amount = match params.base_units() {
        Ok(amount) => amount,
        Err(e) => return schemas.fail_runtime(e),
    };
    if let Err(failed) = check_balance(schemas, env, &params, amount).await {
        return failed;
    }

    let data = IERC20::transferCall {
        to: params.to,
        amount,
    }
    .abi_encode();
    let call = CallRequest::new(params.token, data);

    match sender.send(env.provider, &env.context.delegator_key, &call).await {
        Ok(hash) => {
            info!(token = %params.token, to = %params.to, %amount, tx_hash = %hash, "Transfer sent");
            schemas.succeed(json!({ "txHash": hash, "amount": amount.to_string() }))
        }
        Err(e) => schemas.fail_runtime(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ability::{Ability, AbilityKind};
    use crate::testing::{MockKeyHolder, MockPaymaster, MockProvider, TOKEN_IN, TOKEN_OUT, context};

    fn transfer() -> Ability {
        let policies = PolicyRegistry::builtin().unwrap();
        Ability::builtin(AbilityKind::Erc20Transfer, &policies).unwrap()
    }

    fn params(amount: impl Into<Value>) -> Map<String, Value> {
        let amount: Value = amount.into();
        json!({
            "chain": "base",
            "token": TOKEN_IN.to_string(),
            "to": TOKEN_OUT.to_string(),
            "amount": amount,
            "decimals": 6
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[tokio::test]
    async fn precheck_fails_on_short_balance() {
        let provider = MockProvider::new().with_erc20(TOKEN_IN, U256::from(1_000_000u64), U256::ZERO);
        let ctx = context(IDENTIFIER, 1);
        let env = AbilityEnv {
            provider: &provider,
            context: &ctx,
        };

        let ok = transfer().precheck(&env, &params("1")).await;
        assert!(ok.is_success());
        assert_eq!(ok.result().unwrap()["required"], json!("1000000"));

        let short = transfer().precheck(&env, &params("1.5")).await;
        assert!(!short.is_success());
        assert_eq!(short.result().unwrap()["balance"], json!("1000000"));
        assert!(short.result().unwrap()["reason"]
            .as_str()
            .unwrap()
            .starts_with("Insufficient balance"));
    }

    #[tokio::test]
    async fn execute_signs_transfer_call() {
        let provider =
            MockProvider::new().with_erc20(TOKEN_IN, U256::from(10_000_000u64), U256::ZERO);
        let ctx = context(IDENTIFIER, 1);
        let env = AbilityEnv {
            provider: &provider,
            context: &ctx,
        };
        let key_holder = MockKeyHolder::new();
        let sender: TransactionSender<_, MockPaymaster> = TransactionSender::new(key_holder.clone());

        let result = transfer().execute(&env, &sender, &params(2.5)).await;

        assert!(result.is_success(), "{result:?}");
        let signed = key_holder.signed_transactions();
        assert_eq!(signed.len(), 1);
        assert_eq!(signed[0].to, TOKEN_IN);
        let call = IERC20::transferCall::abi_decode(&signed[0].data, true).unwrap();
        assert_eq!(call.to, TOKEN_OUT);
        assert_eq!(call.amount, U256::from(2_500_000u64));
        assert_eq!(provider.broadcasts().len(), 1);
    }

    #[tokio::test]
    async fn broadcast_failure_is_a_runtime_error() {
        let provider = MockProvider::new()
            .with_erc20(TOKEN_IN, U256::from(10_000_000u64), U256::ZERO)
            .failing_broadcast();
        let ctx = context(IDENTIFIER, 1);
        let env = AbilityEnv {
            provider: &provider,
            context: &ctx,
        };
        let sender: TransactionSender<_, MockPaymaster> = TransactionSender::new(MockKeyHolder::new());

        let result = transfer().execute(&env, &sender, &params(1.0)).await;

        assert!(!result.is_success());
        assert!(result.runtime_error().unwrap().contains("nonce too low"));
    }

    #[tokio::test]
    async fn large_amounts_transfer_exactly() {
        let provider = MockProvider::new().with_erc20(TOKEN_IN, U256::MAX, U256::ZERO);
        let ctx = context(IDENTIFIER, 1);
        let env = AbilityEnv {
            provider: &provider,
            context: &ctx,
        };
        let key_holder = MockKeyHolder::new();
        let sender: TransactionSender<_, MockPaymaster> = TransactionSender::new(key_holder.clone());

        let result = transfer()
            .execute(&env, &sender, &params("9007199254740993.000001"))
            .await;

        assert!(result.is_success(), "{result:?}");
        let call = IERC20::transferCall::abi_decode(&key_holder.signed_transactions()[0].data, true)
            .unwrap();
        assert_eq!(call.amount, U256::from(9_007_199_254_740_993_000_001u128));
    }

    #[tokio::test]
    async fn inexact_number_amount_is_rejected() {
        let provider = MockProvider::new().with_erc20(TOKEN_IN, U256::MAX, U256::ZERO);
        let ctx = context(IDENTIFIER, 1);
        let env = AbilityEnv {
            provider: &provider,
            context: &ctx,
        };
        let key_holder = MockKeyHolder::new();
        let sender: TransactionSender<_, MockPaymaster> = TransactionSender::new(key_holder.clone());

        let result = transfer()
            .execute(&env, &sender, &params(2f64.powi(53) + 1.0))
            .await;

        assert!(!result.is_success());
        assert!(result.runtime_error().unwrap().contains("decimal string"));
        assert!(key_holder.signed_transactions().is_empty());
    }
}
