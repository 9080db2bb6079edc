//! The execution protocol.
//!
//! An invocation moves through
//! `INIT → PRECHECK → PERMISSION_CHECK → POLICY_EVAL → EXECUTE → POLICY_COMMIT`
//! and ends `DONE`, `DENIED` or `FAILED`. Every failure becomes a failed
//! [`AbilityResult`]; nothing escapes as an error. Every stage is logged and
//! appended to the invocation journal.

use chain::{Delegation, Networks, PermissionError, PermissionQuery, PermissionValidator, Provider};
use chrono::Utc;
use policy::{CommitRecord, PolicyEvaluationResult, PolicyPipeline};
use schema::{AbilityResult, ExecutionContext, ResultSchemas, Schema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use storage::{Event, EventKind, EventStore, InvocationId, SpendLedger};
use tracing::{debug, info, warn};

use crate::ability::{Ability, AbilityEnv, AbilityRegistry};
use crate::transaction::{KeyHolder, Paymaster, PaymasterClient, TransactionSender};

/// A request to run an ability for a delegator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    pub ability_params: Map<String, Value>,
    pub execution_context: ExecutionContext,
}

/// Protocol states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Init,
    Precheck,
    PermissionCheck,
    PolicyEval,
    Execute,
    PolicyCommit,
    Done,
    Denied,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Precheck => "PRECHECK",
            Self::PermissionCheck => "PERMISSION_CHECK",
            Self::PolicyEval => "POLICY_EVAL",
            Self::Execute => "EXECUTE",
            Self::PolicyCommit => "POLICY_COMMIT",
            Self::Done => "DONE",
            Self::Denied => "DENIED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// How an invocation went, beyond the ability's own result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    pub invocation_id: InvocationId,
    /// Terminal state: `DONE`, `DENIED` or `FAILED`.
    pub stage: Stage,
    /// The stage that denied or failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegation: Option<Delegation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_error: Option<PermissionError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policies_context: Option<PolicyEvaluationResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commits: Vec<CommitRecord>,
}

/// The ability result, flattened, plus the invocation context.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationResponse {
    #[serde(flatten)]
    pub result: AbilityResult,
    pub context: InvocationContext,
}

impl InvocationResponse {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }

    pub fn stage(&self) -> Stage {
        self.context.stage
    }
}

/// Journal and log for one invocation.
struct Invocation<'j> {
    journal: &'j EventStore,
    current: Stage,
    context: InvocationContext,
}

impl<'j> Invocation<'j> {
    fn start(journal: &'j EventStore, context: &ExecutionContext) -> Self {
        let invocation_id = InvocationId::new();
        info!(
            invocation = %invocation_id,
            ability = %context.ability_identifier,
            delegator = %context.delegator_key.address,
            delegatee = %context.delegatee_address,
            app_id = context.app_id,
            app_version = context.app_version,
            "Invocation started"
        );
        let invocation = Self {
            journal,
            current: Stage::Init,
            context: InvocationContext {
                invocation_id,
                stage: Stage::Init,
                failed_at: None,
                delegation: None,
                permission_error: None,
                policies_context: None,
                commits: Vec::new(),
            },
        };
        invocation.record(EventKind::InvocationStart {
            ability: context.ability_identifier.clone(),
            delegator: context.delegator_key.address.to_string(),
            delegatee: context.delegatee_address.to_string(),
            app_id: context.app_id,
            app_version: context.app_version,
        });
        invocation
    }

    fn record(&self, kind: EventKind) {
        let event = Event::new(self.context.invocation_id, kind);
        if let Err(e) = self.journal.append(&event) {
            warn!(
                invocation = %self.context.invocation_id,
                event = event.kind.name(),
                error = %e,
                "Failed to journal event"
            );
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(invocation = %self.context.invocation_id, %stage, "Entering stage");
        self.current = stage;
    }

    fn end(mut self, stage: Stage, result: AbilityResult) -> InvocationResponse {
        if stage != Stage::Done {
            self.context.failed_at = Some(self.current);
        }
        self.context.stage = stage;

        match stage {
            Stage::Done => info!(invocation = %self.context.invocation_id, "Invocation done"),
            _ => warn!(
                invocation = %self.context.invocation_id,
                %stage,
                at = %self.current,
                error = result.runtime_error().unwrap_or_default(),
                "Invocation ended early"
            ),
        }
        self.record(EventKind::InvocationEnd {
            outcome: stage.to_string(),
        });

        InvocationResponse {
            result,
            context: self.context,
        }
    }

    fn done(self, result: AbilityResult) -> InvocationResponse {
        self.end(Stage::Done, result)
    }

    fn denied(self, result: AbilityResult) -> InvocationResponse {
        self.end(Stage::Denied, result)
    }

    fn failed(self, result: AbilityResult) -> InvocationResponse {
        self.end(Stage::Failed, result)
    }

    fn record_decisions(&self, evaluation: &PolicyEvaluationResult) {
        for policy in evaluation.evaluated_policies() {
            self.record(EventKind::PolicyEvaluated {
                policy: policy.clone(),
                allow: evaluation.allowed_policies().contains_key(policy),
            });
        }
    }
}

/// Result schemas for failures outside any ability, e.g. an unknown
/// ability identifier.
fn kernel_schemas(stage: schema::Stage) -> ResultSchemas {
    ResultSchemas::new(
        stage,
        Schema::any("kernel/success"),
        Schema::any("kernel/failure"),
    )
}

fn denial(schemas: &ResultSchemas, evaluation: &PolicyEvaluationResult) -> AbilityResult {
    let reason = match evaluation.denied_policy() {
        Some(denied) => format!("Policy {} denied: {}", denied.identifier, denied.reason),
        None => "Denied by policy".to_string(),
    };
    schemas.fail(json!({ "reason": reason }))
}

/// Runs abilities for delegatees, gated by on-chain permissions and policies.
///
/// `P` reaches EVM nodes, `K` signs, and `M` sponsors gas when configured.
pub struct Executor<P, K, M = PaymasterClient> {
    abilities: AbilityRegistry,
    networks: Networks<P>,
    permissions: PermissionValidator<P>,
    sender: TransactionSender<K, M>,
    journal: EventStore,
    ledger: SpendLedger,
}

impl<P, K, M> Executor<P, K, M>
where
    P: Provider,
    K: KeyHolder,
    M: Paymaster,
{
    pub fn new(
        abilities: AbilityRegistry,
        networks: Networks<P>,
        permissions: PermissionValidator<P>,
        sender: TransactionSender<K, M>,
        journal: EventStore,
        ledger: SpendLedger,
    ) -> Self {
        Self {
            abilities,
            networks,
            permissions,
            sender,
            journal,
            ledger,
        }
    }

    pub fn abilities(&self) -> &AbilityRegistry {
        &self.abilities
    }

    pub fn permissions(&self) -> &PermissionValidator<P> {
        &self.permissions
    }

    pub fn journal(&self) -> &EventStore {
        &self.journal
    }

    pub fn ledger(&self) -> &SpendLedger {
        &self.ledger
    }

    /// Resolve the ability and the node its parameters target, and validate
    /// the parameters.
    fn init<'s>(
        &'s self,
        stage: schema::Stage,
        params: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> Result<(&'s Ability, &'s P), AbilityResult> {
        let Some(ability) = self.abilities.get(&context.ability_identifier) else {
            return Err(kernel_schemas(stage).fail_runtime(format!(
                "unknown ability: {}",
                context.ability_identifier
            )));
        };
        let schemas = match stage {
            schema::Stage::Precheck => ability.definition().precheck(),
            _ => ability.definition().execute(),
        };

        ability
            .check_params(params)
            .map_err(|e| schemas.fail_invalid(e))?;

        let chain = ability
            .chain(params)
            .ok_or_else(|| schemas.fail_runtime("ability parameters name no chain"))?;
        let provider = self
            .networks
            .get(chain)
            .map_err(|e| schemas.fail_runtime(e.to_string()))?;
        Ok((ability, provider))
    }

    /// Ask the registry. Fresh for every call, never cached.
    async fn check_permission(
        &self,
        run: &mut Invocation<'_>,
        schemas: &ResultSchemas,
        context: &ExecutionContext,
    ) -> Result<Delegation, AbilityResult> {
        let query = PermissionQuery {
            delegatee: context.delegatee_address,
            token_id: context.delegator_key.token_id,
            ability: context.ability_identifier.clone(),
            app_id: context.app_id,
            app_version: context.app_version,
        };

        match self.permissions.validate(&query).await {
            Ok(delegation) => {
                run.record(EventKind::PermissionCheck {
                    permitted: true,
                    error: None,
                });
                run.context.delegation = Some(delegation.clone());
                Ok(delegation)
            }
            Err(e) => {
                run.record(EventKind::PermissionCheck {
                    permitted: false,
                    error: Some(e.to_string()),
                });
                let result = schemas.fail_runtime(format!("{e}. {}", e.remediation()));
                run.context.permission_error = Some(e);
                Err(result)
            }
        }
    }

    /// Bind the ability's policies to this invocation, failing when the app
    /// version enabled a policy the ability has no slot for.
    fn pipeline<'a>(
        &'a self,
        ability: &'a Ability,
        delegation: &'a Delegation,
        context: &'a ExecutionContext,
        schemas: &ResultSchemas,
    ) -> Result<PolicyPipeline<'a>, AbilityResult> {
        let pipeline = PolicyPipeline::new(
            ability.definition().slots(),
            &delegation.policies,
            context,
            &self.ledger,
        );
        let unsupported = pipeline.unsupported();
        if !unsupported.is_empty() {
            return Err(schemas.fail_runtime(format!(
                "policies enabled on-chain but not supported by {}: {}",
                ability.identifier(),
                unsupported.join(", ")
            )));
        }
        Ok(pipeline)
    }

    /// Everything short of execution: permission, policy prechecks and the
    /// ability precheck. Never signs or broadcasts.
    pub async fn precheck(&self, request: InvocationRequest) -> InvocationResponse {
        let InvocationRequest {
            ability_params: params,
            execution_context: context,
        } = request;
        let mut run = Invocation::start(&self.journal, &context);

        let (ability, provider) = match self.init(schema::Stage::Precheck, &params, &context) {
            Ok(resolved) => resolved,
            Err(failed) => return run.failed(failed),
        };
        let schemas = ability.definition().precheck();

        run.enter(Stage::PermissionCheck);
        let delegation = match self.check_permission(&mut run, schemas, &context).await {
            Ok(delegation) => delegation,
            Err(failed) => return run.failed(failed),
        };

        run.enter(Stage::PolicyEval);
        let pipeline = match self.pipeline(ability, &delegation, &context, schemas) {
            Ok(pipeline) => pipeline,
            Err(failed) => return run.failed(failed),
        };
        let evaluation = pipeline.precheck(&params, Utc::now());
        run.record_decisions(&evaluation);
        let denied = (!evaluation.is_allowed()).then(|| denial(schemas, &evaluation));
        run.context.policies_context = Some(evaluation);
        if let Some(result) = denied {
            return run.denied(result);
        }

        run.enter(Stage::Precheck);
        let env = AbilityEnv {
            provider,
            context: &context,
        };
        let result = ability.precheck(&env, &params).await;
        run.record(EventKind::Precheck {
            success: result.is_success(),
        });
        if result.is_success() {
            run.done(result)
        } else {
            run.failed(result)
        }
    }

    /// Run the full protocol.
    ///
    /// Once `EXECUTE` has broadcast, the invocation runs to completion:
    /// commit failures are recorded and never undo the execution.
    pub async fn execute(&self, request: InvocationRequest) -> InvocationResponse {
        let InvocationRequest {
            ability_params: params,
            execution_context: context,
        } = request;
        let mut run = Invocation::start(&self.journal, &context);

        let (ability, provider) = match self.init(schema::Stage::Execute, &params, &context) {
            Ok(resolved) => resolved,
            Err(failed) => return run.failed(failed),
        };
        let schemas = ability.definition().execute();
        let env = AbilityEnv {
            provider,
            context: &context,
        };

        run.enter(Stage::Precheck);
        let precheck = ability.precheck(&env, &params).await;
        run.record(EventKind::Precheck {
            success: precheck.is_success(),
        });
        if !precheck.is_success() {
            return run.failed(precheck);
        }

        run.enter(Stage::PermissionCheck);
        let delegation = match self.check_permission(&mut run, schemas, &context).await {
            Ok(delegation) => delegation,
            Err(failed) => return run.failed(failed),
        };

        run.enter(Stage::PolicyEval);
        let pipeline = match self.pipeline(ability, &delegation, &context, schemas) {
            Ok(pipeline) => pipeline,
            Err(failed) => return run.failed(failed),
        };
        let evaluation = pipeline.evaluate(&params, Utc::now());
        run.record_decisions(&evaluation);
        if !evaluation.is_allowed() {
            let result = denial(schemas, &evaluation);
            run.context.policies_context = Some(evaluation);
            return run.denied(result);
        }

        run.enter(Stage::Execute);
        let result = ability.execute(&env, &self.sender, &params).await;
        run.record(EventKind::Execute {
            success: result.is_success(),
            output: result.result().cloned(),
        });
        if !result.is_success() {
            run.context.policies_context = Some(evaluation);
            return run.failed(result);
        }

        run.enter(Stage::PolicyCommit);
        let execution = result.result().cloned().unwrap_or(Value::Null);
        let commits = pipeline.commit(&params, &evaluation, &execution, Utc::now());
        for commit in &commits {
            run.record(EventKind::PolicyCommitted {
                policy: commit.identifier.clone(),
                allow: commit.result.is_allowed(),
            });
            if !commit.result.is_allowed() {
                warn!(
                    invocation = %run.context.invocation_id,
                    policy = %commit.identifier,
                    error = commit.result.runtime_error().unwrap_or_default(),
                    "Policy commit failed"
                );
            }
        }
        run.context.policies_context = Some(evaluation);
        run.context.commits = commits;
        run.done(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ability::AbilityKind;
    use crate::testing::{
        DELEGATOR, MockKeyHolder, MockPaymaster, MockProvider, REGISTRY, ROUTER, TOKEN_IN,
        TOKEN_OUT, context, grant, string_array_param, uint_param,
    };
    use alloy_primitives::U256;
    use chain::registry::IDelegationRegistry::PolicyWithParameters;
    use chrono::Duration;
    use policy::{PolicyKind, PolicyRegistry};
    use storage::LedgerKey;

    type TestExecutor = Executor<MockProvider, MockKeyHolder, MockPaymaster>;

    fn executor(provider: &MockProvider) -> TestExecutor {
        executor_with(
            provider,
            TransactionSender::new(MockKeyHolder::new()),
            SpendLedger::in_memory().unwrap(),
        )
    }

    fn executor_with(
        provider: &MockProvider,
        sender: TransactionSender<MockKeyHolder, MockPaymaster>,
        ledger: SpendLedger,
    ) -> TestExecutor {
        let policies = PolicyRegistry::builtin().unwrap();
        Executor::new(
            AbilityRegistry::builtin(&policies).unwrap(),
            Networks::new().with("base", provider.clone()),
            PermissionValidator::new(provider.clone(), REGISTRY),
            sender,
            EventStore::in_memory().unwrap(),
            ledger,
        )
    }

    fn journal(executor: &TestExecutor, response: &InvocationResponse) -> Vec<EventKind> {
        executor
            .journal()
            .load_invocation(response.context.invocation_id)
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }

    fn transfer_policies() -> Vec<PolicyWithParameters> {
        vec![
            grant(
                PolicyKind::SpendingLimit.identifier(),
                vec![uint_param("maxDailySpendUsd", 100)],
            ),
            grant(
                PolicyKind::ContractWhitelist.identifier(),
                vec![string_array_param("whitelist", &[&format!("base:{TOKEN_IN}")])],
            ),
        ]
    }

    fn transfer(amount: impl Into<Value>, app_version: u64) -> InvocationRequest {
        let amount: Value = amount.into();
        let params = json!({
            "chain": "base",
            "token": TOKEN_IN.to_string(),
            "to": TOKEN_OUT.to_string(),
            "amount": amount,
            "decimals": 6
        });
        InvocationRequest {
            ability_params: params.as_object().unwrap().clone(),
            execution_context: context(AbilityKind::Erc20Transfer.identifier(), app_version),
        }
    }

    fn funded() -> MockProvider {
        MockProvider::new().with_erc20(TOKEN_IN, U256::from(1_000_000_000u64), U256::ZERO)
    }

    fn spend_key() -> LedgerKey {
        LedgerKey::new(DELEGATOR.to_string(), 7, "spending-limit")
    }

    #[tokio::test]
    async fn spending_limit_denial_never_broadcasts() {
        let provider = funded().with_delegation(2, transfer_policies());
        let executor = executor(&provider);
        executor
            .ledger()
            .record(&spend_key(), 90.0, Utc::now() - Duration::hours(2))
            .unwrap();

        let response = executor.execute(transfer(20.0, 2)).await;

        assert!(!response.is_success());
        assert_eq!(response.stage(), Stage::Denied);
        assert_eq!(response.context.failed_at, Some(Stage::PolicyEval));
        let reason = response.result.result().unwrap()["reason"].as_str().unwrap();
        assert!(reason.starts_with("Policy @agentkey/policy-spending-limit denied:"));
        let evaluation = response.context.policies_context.as_ref().unwrap();
        assert_eq!(
            evaluation.denied_policy().unwrap().identifier,
            PolicyKind::SpendingLimit.identifier()
        );
        assert!(provider.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn allowed_transfer_executes_and_commits() {
        let provider = funded().with_delegation(2, transfer_policies());
        let executor = executor(&provider);
        let now = Utc::now();
        executor
            .ledger()
            .record(&spend_key(), 90.0, now - Duration::hours(2))
            .unwrap();

        let response = executor.execute(transfer(5.0, 2)).await;

        assert!(response.is_success(), "{:?}", response.result);
        assert_eq!(response.stage(), Stage::Done);
        assert_eq!(response.context.failed_at, None);
        let broadcasts = provider.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(
            response.result.result().unwrap()["txHash"],
            json!(provider.hash_of(&broadcasts[0]))
        );
        assert_eq!(response.result.result().unwrap()["amount"], json!("5000000"));

        let commits: Vec<_> = response
            .context
            .commits
            .iter()
            .map(|c| c.identifier.as_str())
            .collect();
        assert_eq!(commits, [PolicyKind::SpendingLimit.identifier()]);
        let spent = executor
            .ledger()
            .total_since(&spend_key(), now - Duration::days(1))
            .unwrap();
        assert_eq!(spent, 95.0);
    }

    fn swap(buy_amount: f64) -> InvocationRequest {
        let params = json!({
            "chain": "base",
            "router": ROUTER.to_string(),
            "tokenIn": TOKEN_IN.to_string(),
            "tokenOut": TOKEN_OUT.to_string(),
            "tokenInDecimals": 6,
            "buyAmount": buy_amount
        });
        InvocationRequest {
            ability_params: params.as_object().unwrap().clone(),
            execution_context: context(AbilityKind::UniswapSwap.identifier(), 1),
        }
    }

    #[tokio::test]
    async fn swap_within_limit_debits_ledger() {
        let provider = MockProvider::new()
            .with_erc20(TOKEN_IN, U256::from(500_000_000u64), U256::from(500_000_000u64))
            .with_delegation(
                1,
                vec![grant(
                    PolicyKind::SpendingLimit.identifier(),
                    vec![uint_param("maxDailySpendUsd", 100)],
                )],
            );
        let executor = executor(&provider);
        let now = Utc::now();
        executor
            .ledger()
            .record(&spend_key(), 90.0, now - Duration::hours(2))
            .unwrap();

        let denied = executor.execute(swap(20.0)).await;
        assert_eq!(denied.stage(), Stage::Denied);
        assert!(provider.broadcasts().is_empty());

        let response = executor.execute(swap(5.0)).await;
        assert_eq!(response.stage(), Stage::Done, "{:?}", response.result);
        assert_eq!(provider.broadcasts().len(), 1);
        assert_eq!(response.result.result().unwrap()["amountIn"], json!("5000000"));
        let evaluation = response.context.policies_context.as_ref().unwrap();
        assert_eq!(
            evaluation.allowed_policies().keys().collect::<Vec<_>>(),
            evaluation.evaluated_policies().iter().collect::<Vec<_>>()
        );
        let spent = executor
            .ledger()
            .total_since(&spend_key(), now - Duration::days(1))
            .unwrap();
        assert_eq!(spent, 95.0);
    }

    #[tokio::test]
    async fn stale_app_version_fails_permission_check() {
        let provider = funded().with_delegation(2, transfer_policies());
        let executor = executor(&provider);

        let response = executor.execute(transfer(5.0, 3)).await;

        assert_eq!(response.stage(), Stage::Failed);
        assert_eq!(response.context.failed_at, Some(Stage::PermissionCheck));
        assert!(matches!(
            response.context.permission_error,
            Some(PermissionError::StaleContext { .. })
        ));
        assert!(response.context.policies_context.is_none());
        assert!(provider.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn policy_without_slot_fails_before_evaluation() {
        let mut policies = transfer_policies();
        policies.push(grant("@other/policy-geofence", vec![]));
        let provider = funded().with_delegation(2, policies);
        let executor = executor(&provider);

        let response = executor.execute(transfer(5.0, 2)).await;

        assert_eq!(response.stage(), Stage::Failed);
        assert_eq!(response.context.failed_at, Some(Stage::PolicyEval));
        assert!(response
            .result
            .runtime_error()
            .unwrap()
            .contains("@other/policy-geofence"));
        assert!(response.context.delegation.is_some());
        assert!(provider.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn invalid_params_fail_at_init() {
        let provider = funded().with_delegation(2, transfer_policies());
        let executor = executor(&provider);
        let mut request = transfer(5.0, 2);
        request.ability_params.remove("to");

        let response = executor.execute(request).await;

        assert_eq!(response.stage(), Stage::Failed);
        assert_eq!(response.context.failed_at, Some(Stage::Init));
        assert!(response.result.schema_validation_error().is_some());
        assert!(response.context.delegation.is_none());
    }

    #[tokio::test]
    async fn unknown_ability_fails_at_init() {
        let provider = funded();
        let executor = executor(&provider);
        let mut request = transfer(5.0, 2);
        request.execution_context.ability_identifier = "@agentkey/ability-bridge".into();

        let response = executor.execute(request).await;

        assert_eq!(response.context.failed_at, Some(Stage::Init));
        assert!(response
            .result
            .runtime_error()
            .unwrap()
            .contains("unknown ability"));
    }

    #[tokio::test]
    async fn precheck_reports_missing_allowance_without_signing() {
        let provider = MockProvider::new()
            .with_erc20(TOKEN_IN, U256::from(10u64).pow(U256::from(20)), U256::ZERO)
            .with_delegation(
                1,
                vec![
                    grant(
                        PolicyKind::ContractWhitelist.identifier(),
                        vec![string_array_param("whitelist", &[&format!("base:{ROUTER}")])],
                    ),
                    grant(
                        PolicyKind::RateLimit.identifier(),
                        vec![uint_param("maxExecutions", 5), uint_param("windowSeconds", 3600)],
                    ),
                ],
            );
        let executor = executor(&provider);
        let params = json!({
            "chain": "base",
            "router": ROUTER.to_string(),
            "tokenIn": TOKEN_IN.to_string(),
            "tokenOut": TOKEN_OUT.to_string(),
            "tokenInDecimals": 18,
            "buyAmount": 1.5
        });
        let request = InvocationRequest {
            ability_params: params.as_object().unwrap().clone(),
            execution_context: context(AbilityKind::UniswapSwap.identifier(), 1),
        };

        let response = executor.precheck(request).await;

        assert_eq!(response.stage(), Stage::Failed);
        assert_eq!(response.context.failed_at, Some(Stage::Precheck));
        let result = response.result.result().unwrap();
        assert!(result["reason"].as_str().unwrap().contains("not approved"));
        assert_eq!(result["allowance"], json!("0"));
        let evaluation = response.context.policies_context.as_ref().unwrap();
        assert!(evaluation.is_allowed());
        assert!(provider.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn journals_every_stage_in_order() {
        let provider = funded().with_delegation(2, transfer_policies());
        let executor = executor(&provider);

        let response = executor.execute(transfer(5.0, 2)).await;
        assert!(response.is_success());

        let events = executor
            .journal()
            .load_invocation(response.context.invocation_id)
            .unwrap();
        let names: Vec<_> = events.iter().map(|e| e.kind.name()).collect();
        assert_eq!(
            names,
            [
                "invocation_start",
                "precheck",
                "permission_check",
                "policy_evaluated",
                "policy_evaluated",
                "execute",
                "policy_committed",
                "invocation_end",
            ]
        );
        assert_eq!(
            events.last().unwrap().kind,
            EventKind::InvocationEnd {
                outcome: "DONE".into()
            }
        );
    }

    #[tokio::test]
    async fn response_flattens_result_beside_context() {
        let provider = funded().with_delegation(2, transfer_policies());
        let executor = executor(&provider);
        executor
            .ledger()
            .record(&spend_key(), 99.0, Utc::now())
            .unwrap();

        let response = executor.execute(transfer(5.0, 2)).await;
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["success"], json!(false));
        assert!(value["result"]["reason"].is_string());
        assert_eq!(value["context"]["stage"], json!("DENIED"));
        assert_eq!(value["context"]["failedAt"], json!("POLICY_EVAL"));
        assert_eq!(value["context"]["delegation"]["appVersion"], json!(U256::from(2)));
        assert!(value["context"]["policiesContext"]["deniedPolicy"].is_object());
        assert!(value["context"].get("commits").is_none());
        assert!(value["context"].get("permissionError").is_none());
    }

    #[tokio::test]
    async fn failed_commit_is_recorded_and_invocation_still_done() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let ledger = SpendLedger::open(&path).unwrap();
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_spend BEFORE INSERT ON ledger
                 BEGIN SELECT RAISE(ABORT, 'ledger is read-only'); END;",
            )
            .unwrap();
        let provider = funded().with_delegation(2, transfer_policies());
        let executor = executor_with(&provider, TransactionSender::new(MockKeyHolder::new()), ledger);

        let response = executor.execute(transfer(5.0, 2)).await;

        assert!(response.is_success(), "{:?}", response.result);
        assert_eq!(response.stage(), Stage::Done);
        assert_eq!(response.context.failed_at, None);
        assert_eq!(provider.broadcasts().len(), 1);
        let [commit] = response.context.commits.as_slice() else {
            panic!("expected one commit, got {:?}", response.context.commits);
        };
        assert_eq!(commit.identifier, PolicyKind::SpendingLimit.identifier());
        assert!(!commit.result.is_allowed());
        assert!(commit
            .result
            .runtime_error()
            .unwrap()
            .contains("failed to record spend"));

        let events = journal(&executor, &response);
        assert_eq!(
            events[events.len() - 2..],
            [
                EventKind::PolicyCommitted {
                    policy: PolicyKind::SpendingLimit.identifier().into(),
                    allow: false,
                },
                EventKind::InvocationEnd {
                    outcome: "DONE".into()
                },
            ]
        );
        let spent = executor
            .ledger()
            .total_since(&spend_key(), Utc::now() - Duration::days(1))
            .unwrap();
        assert_eq!(spent, 0.0);
    }

    #[tokio::test]
    async fn broadcast_failure_fails_execute_without_commits() {
        let provider = funded()
            .with_delegation(2, transfer_policies())
            .failing_broadcast();
        let executor = executor(&provider);

        let response = executor.execute(transfer(5.0, 2)).await;

        assert!(!response.is_success());
        assert_eq!(response.stage(), Stage::Failed);
        assert_eq!(response.context.failed_at, Some(Stage::Execute));
        assert!(response
            .result
            .runtime_error()
            .unwrap()
            .contains("broadcast failed"));
        assert!(response.context.policies_context.as_ref().unwrap().is_allowed());
        assert!(response.context.commits.is_empty());

        let events = journal(&executor, &response);
        assert_eq!(
            events[events.len() - 2..],
            [
                EventKind::Execute {
                    success: false,
                    output: None,
                },
                EventKind::InvocationEnd {
                    outcome: "FAILED".into()
                },
            ]
        );
        assert!(!events
            .iter()
            .any(|e| matches!(e, EventKind::PolicyCommitted { .. })));
        let spent = executor
            .ledger()
            .total_since(&spend_key(), Utc::now() - Duration::days(1))
            .unwrap();
        assert_eq!(spent, 0.0);
    }

    #[tokio::test]
    async fn signing_failure_fails_execute_before_broadcast() {
        let provider = funded().with_delegation(2, transfer_policies());
        let executor = executor_with(
            &provider,
            TransactionSender::new(MockKeyHolder::refusing()),
            SpendLedger::in_memory().unwrap(),
        );

        let response = executor.execute(transfer(5.0, 2)).await;

        assert_eq!(response.stage(), Stage::Failed);
        assert_eq!(response.context.failed_at, Some(Stage::Execute));
        assert!(response.result.runtime_error().unwrap().contains("signing failed"));
        assert!(response.context.commits.is_empty());
        assert!(provider.broadcasts().is_empty());
        assert_eq!(
            journal(&executor, &response).last(),
            Some(&EventKind::InvocationEnd {
                outcome: "FAILED".into()
            })
        );
    }

    #[tokio::test]
    async fn sponsored_transfer_runs_through_paymaster() {
        let provider = funded()
            .with_delegation(2, transfer_policies())
            .failing_estimate_gas();
        let key_holder = MockKeyHolder::new();
        let paymaster = MockPaymaster::new();
        let executor = executor_with(
            &provider,
            TransactionSender::new(key_holder.clone()).with_paymaster(paymaster.clone()),
            SpendLedger::in_memory().unwrap(),
        );

        let response = executor.execute(transfer("12.5", 2)).await;

        assert_eq!(response.stage(), Stage::Done, "{:?}", response.result);
        let result = response.result.result().unwrap();
        assert_eq!(result["txHash"], json!(MockPaymaster::TX_HASH));
        assert_eq!(result["amount"], json!("12500000"));
        assert!(provider.broadcasts().is_empty());
        assert!(key_holder.signed_transactions().is_empty());
        assert_eq!(key_holder.signed_messages().len(), 1);
        assert_eq!(paymaster.submitted().len(), 1);
        assert!(response.context.commits.iter().all(|c| c.result.is_allowed()));

        let names: Vec<_> = journal(&executor, &response).iter().map(EventKind::name).collect();
        assert_eq!(
            names[names.len() - 3..],
            ["execute", "policy_committed", "invocation_end"]
        );
        let spent = executor
            .ledger()
            .total_since(&spend_key(), Utc::now() - Duration::days(1))
            .unwrap();
        assert_eq!(spent, 12.5);
    }

    #[tokio::test]
    async fn response_serializes_context_once() {
        let provider = funded().with_delegation(2, transfer_policies());
        let executor = executor(&provider);

        let response = executor.execute(transfer(5.0, 2)).await;
        let text = serde_json::to_string(&response).unwrap();

        assert_eq!(text.matches("\"context\"").count(), 1);
    }
}
