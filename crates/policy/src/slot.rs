//! Binding policies to an ability's parameters.

use std::collections::HashSet;
use std::sync::Arc;

use schema::Schema;
use serde_json::{Map, Value};

use crate::{Error, Policy, Result};

/// A policy an ability supports, with the mapping from the ability's
/// parameter names to the policy's.
#[derive(Debug, Clone)]
pub struct PolicySlot {
    policy: Arc<Policy>,
    mapping: Vec<(String, String)>,
}

impl PolicySlot {
    /// Bind `policy` to an ability whose parameters follow `ability_params`.
    ///
    /// Every mapping key must be a property of the ability's parameter
    /// schema, every value a property of the policy's, and no policy
    /// parameter may be fed twice.
    pub fn new(
        ability_params: &Schema,
        policy: Arc<Policy>,
        mapping: &[(&str, &str)],
    ) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidMapping {
            policy: policy.identifier().to_string(),
            reason,
        };

        let mut targets = HashSet::new();
        for (from, to) in mapping {
            if !ability_params.has_property(from) {
                return Err(invalid(format!(
                    "ability parameter `{from}` is not declared by {}",
                    ability_params.name()
                )));
            }
            if !policy.definition().params().has_property(to) {
                return Err(invalid(format!("policy parameter `{to}` is not declared")));
            }
            if !targets.insert(*to) {
                return Err(invalid(format!("policy parameter `{to}` is mapped twice")));
            }
        }

        Ok(Self {
            mapping: mapping
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            policy,
        })
    }

    pub fn policy(&self) -> &Arc<Policy> {
        &self.policy
    }

    pub fn identifier(&self) -> &str {
        self.policy.identifier()
    }

    pub fn mapping(&self) -> &[(String, String)] {
        &self.mapping
    }

    /// Project ability parameters into this policy's parameter names.
    ///
    /// Ability parameters without a mapping entry never reach the policy.
    pub fn compose(&self, ability_params: &Map<String, Value>) -> Map<String, Value> {
        self.mapping
            .iter()
            .filter_map(|(from, to)| {
                ability_params
                    .get(from)
                    .map(|value| (to.clone(), value.clone()))
            })
            .collect()
    }
}
