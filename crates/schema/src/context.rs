//! Per-invocation execution context.

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// The delegator's custodial key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatorKey {
    pub token_id: U256,
    pub address: Address,
    pub public_key: Bytes,
}

/// Everything an ability or policy knows about who is invoking it.
///
/// Built fresh for every invocation and dropped with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub delegator_key: DelegatorKey,
    pub delegatee_address: Address,
    pub app_id: u64,
    pub app_version: u64,
    pub ability_identifier: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_invocation_context() {
        let json = r#"{
            "delegatorKey": {
                "tokenId": "0x2a",
                "address": "0x1111111111111111111111111111111111111111",
                "publicKey": "0x04abcd"
            },
            "delegateeAddress": "0x2222222222222222222222222222222222222222",
            "appId": 7,
            "appVersion": 2,
            "abilityIdentifier": "@agentkey/ability-erc20-transfer"
        }"#;
        let ctx: ExecutionContext = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.delegator_key.token_id, U256::from(42));
        assert_eq!(ctx.app_version, 2);
        assert_eq!(ctx.delegator_key.public_key.len(), 3);
    }
}
