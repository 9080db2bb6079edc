//! On-chain permission validation.
//!
//! One read-only registry call answers whether a delegatee may run an
//! ability for a delegator key under an app version, and returns the policy
//! parameters the delegator granted. The answer is never cached; callers
//! validate at precheck time and again at execute time.

use alloy_primitives::{Address, U256};
use alloy_sol_types::{SolCall, SolInterface};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::provider::{CallRequest, Provider};
use crate::registry::IDelegationRegistry::{
    IDelegationRegistryErrors, PolicyWithParameters, validateAbilityExecutionAndGetPoliciesCall,
};
use crate::registry::ParamType;

/// Why a delegatee may not run an ability.
///
/// Each kind calls for different remediation by the caller; see
/// [`PermissionError::remediation`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PermissionError {
    #[error("app {app_id} is not registered")]
    AppNotRegistered { app_id: String },

    #[error("app {app_id} has no version {app_version}")]
    AppVersionNotRegistered { app_id: String, app_version: String },

    #[error("app {app_id} has been deleted")]
    AppDeleted { app_id: String },

    #[error("delegatee {delegatee} is not associated with any app")]
    DelegateeNotAssociated { delegatee: String },

    #[error("key is not permitted for app {app_id} version {app_version}")]
    KeyNotPermittedForVersion { app_id: String, app_version: String },

    #[error("policy {policy} has no value for parameter {parameter}")]
    PolicyParameterMissing { policy: String, parameter: String },

    #[error("delegatee is not permitted to execute this ability")]
    NotPermitted,

    #[error(
        "registry reports app {registry_app_id} version {registry_app_version}, \
         caller expected app {app_id} version {app_version}"
    )]
    StaleContext {
        app_id: u64,
        app_version: u64,
        registry_app_id: String,
        registry_app_version: String,
    },

    #[error("policy {policy} parameter {parameter} is malformed: {reason}")]
    MalformedParameter {
        policy: String,
        parameter: String,
        reason: String,
    },

    #[error("permission registry unavailable: {reason}")]
    Unavailable { reason: String },
}

impl PermissionError {
    /// What the caller should do about it.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::AppNotRegistered { .. } => "Register the app before requesting executions.",
            Self::AppVersionNotRegistered { .. } => "Publish this app version or use a registered one.",
            Self::AppDeleted { .. } => "This app was deleted; the delegator must permit another app.",
            Self::DelegateeNotAssociated { .. } => "Add this delegatee address to the app.",
            Self::KeyNotPermittedForVersion { .. } | Self::StaleContext { .. } => {
                "Your permitted version is disabled; update to the latest version."
            }
            Self::PolicyParameterMissing { .. } => {
                "The delegator must set every required policy parameter."
            }
            Self::NotPermitted => "The delegator has not permitted this ability.",
            Self::MalformedParameter { .. } => "The delegator must re-save the policy parameters.",
            Self::Unavailable { .. } => "Retry once the registry is reachable.",
        }
    }
}

impl From<IDelegationRegistryErrors> for PermissionError {
    fn from(error: IDelegationRegistryErrors) -> Self {
        use IDelegationRegistryErrors as E;
        match error {
            E::AppNotRegistered(e) => Self::AppNotRegistered {
                app_id: e.appId.to_string(),
            },
            E::AppVersionNotRegistered(e) => Self::AppVersionNotRegistered {
                app_id: e.appId.to_string(),
                app_version: e.appVersion.to_string(),
            },
            E::AppHasBeenDeleted(e) => Self::AppDeleted {
                app_id: e.appId.to_string(),
            },
            E::DelegateeNotAssociatedWithApp(e) => Self::DelegateeNotAssociated {
                delegatee: e.delegatee.to_string(),
            },
            E::PkpNotPermittedForAppVersion(e) => Self::KeyNotPermittedForVersion {
                app_id: e.appId.to_string(),
                app_version: e.appVersion.to_string(),
            },
            E::PolicyParameterNotSet(e) => Self::PolicyParameterMissing {
                policy: e.policyIpfsCid,
                parameter: e.parameterName,
            },
        }
    }
}

/// Who wants to run what, as the caller believes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionQuery {
    pub delegatee: Address,
    pub token_id: U256,
    pub ability: String,
    pub app_id: u64,
    pub app_version: u64,
}

/// The registry's answer for a permitted delegatee.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    pub app_id: U256,
    pub app_version: U256,
    /// Decoded granted parameters per policy identifier, in registry order.
    pub policies: IndexMap<String, Map<String, Value>>,
}

/// Validates executions against the delegation registry contract.
#[derive(Debug)]
pub struct PermissionValidator<P> {
    provider: P,
    registry: Address,
}

impl<P: Provider> PermissionValidator<P> {
    pub fn new(provider: P, registry: Address) -> Self {
        Self { provider, registry }
    }

    pub fn registry(&self) -> Address {
        self.registry
    }

    /// Ask the registry, without comparing against any expected app version.
    pub async fn query(
        &self,
        delegatee: Address,
        token_id: U256,
        ability: &str,
    ) -> Result<Delegation, PermissionError> {
        let call = validateAbilityExecutionAndGetPoliciesCall {
            delegatee,
            pkpTokenId: token_id,
            abilityIpfsCid: ability.to_string(),
        };
        let request = CallRequest::new(self.registry, call.abi_encode());

        let output = match self.provider.call(&request).await {
            Ok(output) => output,
            Err(e) => return Err(decode_failure(&e)),
        };

        let response = validateAbilityExecutionAndGetPoliciesCall::abi_decode_returns(&output, true)
            .map_err(|e| PermissionError::Unavailable {
                reason: format!("malformed registry response: {e}"),
            })?;

        if !response.isPermitted {
            return Err(PermissionError::NotPermitted);
        }

        let mut policies = IndexMap::new();
        for policy in response.policies {
            let (identifier, params) = decode_policy(policy)?;
            policies.insert(identifier, params);
        }

        Ok(Delegation {
            app_id: response.appId,
            app_version: response.appVersion,
            policies,
        })
    }

    /// Ask the registry and require it to agree with the caller's app and
    /// version.
    #[tracing::instrument(
        skip_all,
        fields(delegatee = %query.delegatee, ability = %query.ability, app_id = query.app_id)
    )]
    pub async fn validate(&self, query: &PermissionQuery) -> Result<Delegation, PermissionError> {
        let delegation = self
            .query(query.delegatee, query.token_id, &query.ability)
            .await
            .inspect_err(|e| warn!(error = %e, "Permission denied"))?;

        if delegation.app_id != U256::from(query.app_id)
            || delegation.app_version != U256::from(query.app_version)
        {
            let error = PermissionError::StaleContext {
                app_id: query.app_id,
                app_version: query.app_version,
                registry_app_id: delegation.app_id.to_string(),
                registry_app_version: delegation.app_version.to_string(),
            };
            warn!(error = %error, "Stale execution context");
            return Err(error);
        }

        info!(policies = delegation.policies.len(), "Permission granted");
        Ok(delegation)
    }
}

fn decode_failure(error: &crate::Error) -> PermissionError {
    let revert = error.as_json_rpc().and_then(|e| e.revert_data());
    match revert.map(|data| IDelegationRegistryErrors::abi_decode(&data, true)) {
        Some(Ok(decoded)) => decoded.into(),
        _ => PermissionError::Unavailable {
            reason: error.to_string(),
        },
    }
}

fn decode_policy(policy: PolicyWithParameters) -> Result<(String, Map<String, Value>), PermissionError> {
    let identifier = policy.policyIpfsCid;
    let mut params = Map::new();
    for parameter in policy.parameters {
        let malformed = |reason: String| PermissionError::MalformedParameter {
            policy: identifier.clone(),
            parameter: parameter.name.clone(),
            reason,
        };
        let kind = ParamType::try_from(parameter.paramType)
            .map_err(|code| malformed(format!("unknown parameter type {code}")))?;
        let value = kind
            .decode(&parameter.value)
            .map_err(|e| malformed(e.to_string()))?;
        params.insert(parameter.name, value);
    }
    Ok((identifier, params))
}
