//! Policy declarations.

use schema::{DecisionSchemas, Schema};

/// Schemas a policy declares for its parameters and every stage it takes
/// part in.
///
/// Precheck and commit schemas are present only for policies that take part
/// in those stages.
#[derive(Debug, Clone)]
pub struct PolicyDefinition {
    identifier: String,
    params: Schema,
    granted: Schema,
    precheck: Option<DecisionSchemas>,
    evaluate: DecisionSchemas,
    commit: Option<DecisionSchemas>,
}

impl PolicyDefinition {
    pub fn new(
        identifier: impl Into<String>,
        params: Schema,
        granted: Schema,
        evaluate: DecisionSchemas,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            params,
            granted,
            precheck: None,
            evaluate,
            commit: None,
        }
    }

    pub fn with_precheck(mut self, schemas: DecisionSchemas) -> Self {
        self.precheck = Some(schemas);
        self
    }

    pub fn with_commit(mut self, schemas: DecisionSchemas) -> Self {
        self.commit = Some(schemas);
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Parameters the policy receives from the ability, after mapping.
    pub fn params(&self) -> &Schema {
        &self.params
    }

    /// Parameters the delegator granted on-chain.
    pub fn granted(&self) -> &Schema {
        &self.granted
    }

    pub fn precheck(&self) -> Option<&DecisionSchemas> {
        self.precheck.as_ref()
    }

    pub fn evaluate(&self) -> &DecisionSchemas {
        &self.evaluate
    }

    pub fn commit(&self) -> Option<&DecisionSchemas> {
        self.commit.as_ref()
    }

    pub fn has_commit(&self) -> bool {
        self.commit.is_some()
    }
}
