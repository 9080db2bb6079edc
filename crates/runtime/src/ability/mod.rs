//! Abilities: schema-typed operations run on behalf of a delegator key.
//!
//! Each built-in ability is a [`AbilityKind`] variant with a declarative
//! [`AbilityDefinition`]: its parameter schema, precheck and execute result
//! schemas, and the policy slots it supports, in evaluation order.

pub(crate) mod erc20;
pub mod erc20_transfer;
pub mod uniswap_swap;

use std::sync::Arc;

use chain::Provider;
use indexmap::IndexMap;
use policy::{Policy, PolicyRegistry, PolicySlot};
use schema::{AbilityResult, ExecutionContext, ResultSchemas, Schema, SchemaValidationError, Stage};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::transaction::{KeyHolder, Paymaster, TransactionSender};
use crate::{Error, Result};

pub use erc20::{TokenAmount, parse_units};

/// Schemas and policy slots an ability declares.
#[derive(Debug, Clone)]
pub struct AbilityDefinition {
    identifier: String,
    params: Schema,
    precheck: ResultSchemas,
    execute: ResultSchemas,
    slots: Vec<PolicySlot>,
}

impl AbilityDefinition {
    pub fn new(
        identifier: impl Into<String>,
        params: Schema,
        precheck: ResultSchemas,
        execute: ResultSchemas,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            params,
            precheck,
            execute,
            slots: Vec::new(),
        }
    }

    /// Support `policy`, feeding it ability parameters through `mapping`.
    ///
    /// Slots are evaluated in the order they are added.
    pub fn with_policy(mut self, policy: Arc<Policy>, mapping: &[(&str, &str)]) -> Result<Self> {
        self.slots.push(PolicySlot::new(&self.params, policy, mapping)?);
        Ok(self)
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn params(&self) -> &Schema {
        &self.params
    }

    pub fn precheck(&self) -> &ResultSchemas {
        &self.precheck
    }

    pub fn execute(&self) -> &ResultSchemas {
        &self.execute
    }

    pub fn slots(&self) -> &[PolicySlot] {
        &self.slots
    }
}

/// The built-in abilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbilityKind {
    Erc20Transfer,
    UniswapSwap,
}

impl AbilityKind {
    pub const ALL: [Self; 2] = [Self::Erc20Transfer, Self::UniswapSwap];

    pub fn identifier(self) -> &'static str {
        match self {
            Self::Erc20Transfer => erc20_transfer::IDENTIFIER,
            Self::UniswapSwap => uniswap_swap::IDENTIFIER,
        }
    }
}

/// What an ability sees when it runs.
pub struct AbilityEnv<'a, P> {
    /// Node for the chain named in the ability parameters.
    pub provider: &'a P,
    pub context: &'a ExecutionContext,
}

/// An ability definition bound to its behavior.
#[derive(Debug)]
pub struct Ability {
    kind: AbilityKind,
    definition: AbilityDefinition,
}

impl Ability {
    pub fn builtin(kind: AbilityKind, policies: &PolicyRegistry) -> Result<Self> {
        let definition = match kind {
            AbilityKind::Erc20Transfer => erc20_transfer::definition(policies)?,
            AbilityKind::UniswapSwap => uniswap_swap::definition(policies)?,
        };
        Ok(Self { kind, definition })
    }

    pub fn kind(&self) -> AbilityKind {
        self.kind
    }

    pub fn identifier(&self) -> &str {
        self.definition.identifier()
    }

    pub fn definition(&self) -> &AbilityDefinition {
        &self.definition
    }

    /// Network the parameters target.
    pub fn chain<'p>(&self, params: &'p Map<String, Value>) -> Option<&'p str> {
        params.get("chain").and_then(Value::as_str)
    }

    /// Validate parameters against the ability's parameter schema.
    pub fn check_params(&self, params: &Map<String, Value>) -> std::result::Result<(), SchemaValidationError> {
        self.definition
            .params
            .check(Stage::Params, &Value::Object(params.clone()))
    }

    /// Read-only validation. Never signs or broadcasts.
    pub async fn precheck<P: Provider>(
        &self,
        env: &AbilityEnv<'_, P>,
        params: &Map<String, Value>,
    ) -> AbilityResult {
        let schemas = &self.definition.precheck;
        match self.kind {
            AbilityKind::Erc20Transfer => erc20_transfer::precheck(schemas, env, params).await,
            AbilityKind::UniswapSwap => uniswap_swap::precheck(schemas, env, params).await,
        }
    }

    pub async fn execute<P, K, M>(
        &self,
        env: &AbilityEnv<'_, P>,
        sender: &TransactionSender<K, M>,
        params: &Map<String, Value>,
    ) -> AbilityResult
    where
        P: Provider,
        K: KeyHolder,
        M: Paymaster,
    {
        let schemas = &self.definition.execute;
        match self.kind {
            AbilityKind::Erc20Transfer => {
                erc20_transfer::execute(schemas, env, sender, params).await
            }
            AbilityKind::UniswapSwap => uniswap_swap::execute(schemas, env, sender, params).await,
        }
    }
}

/// Process-wide set of registered abilities, read-only after construction.
#[derive(Debug, Default)]
pub struct AbilityRegistry {
    abilities: IndexMap<String, Ability>,
}

impl AbilityRegistry {
    /// Register every built-in ability against the built-in policies.
    pub fn builtin(policies: &PolicyRegistry) -> Result<Self> {
        let mut registry = Self::default();
        for kind in AbilityKind::ALL {
            registry.register(Ability::builtin(kind, policies)?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, ability: Ability) {
        self.abilities
            .insert(ability.identifier().to_string(), ability);
    }

    pub fn get(&self, identifier: &str) -> Option<&Ability> {
        self.abilities.get(identifier)
    }

    pub fn require(&self, identifier: &str) -> Result<&Ability> {
        self.get(identifier)
            .ok_or_else(|| Error::UnknownAbility(identifier.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ability> {
        self.abilities.values()
    }
}

fn parse<T: DeserializeOwned>(params: &Map<String, Value>) -> std::result::Result<T, String> {
    serde_json::from_value(Value::Object(params.clone()))
        .map_err(|e| format!("invalid ability parameters: {e}"))
}

fn schema(name: String, document: Value) -> Result<Schema> {
    Ok(Schema::new(name, document)?)
}

/// Success/failure schemas named `<ability>/<stage>/<outcome>`.
fn outcomes(ability: &str, stage: Stage, success: Value, failure: Value) -> Result<ResultSchemas> {
    Ok(ResultSchemas::new(
        stage,
        schema(format!("{ability}/{stage}/success"), success)?,
        schema(format!("{ability}/{stage}/failure"), failure)?,
    ))
}
