//! Delegation registry ABI and policy parameter decoding.

use alloy_primitives::{Address, Bytes, I256, U256, hex};
use alloy_sol_types::{SolType, sol, sol_data};
use serde_json::Value;

sol! {
    /// The on-chain record of which delegatee may run which ability for
    /// which key, and with what policy parameters.
    interface IDelegationRegistry {
        struct PolicyParameter {
            string name;
            uint8 paramType;
            bytes value;
        }

        struct PolicyWithParameters {
            string policyIpfsCid;
            PolicyParameter[] parameters;
        }

        function validateAbilityExecutionAndGetPolicies(
            address delegatee,
            uint256 pkpTokenId,
            string abilityIpfsCid
        ) external view returns (
            bool isPermitted,
            uint256 appId,
            uint256 appVersion,
            PolicyWithParameters[] policies
        );

        error AppNotRegistered(uint256 appId);
        error AppVersionNotRegistered(uint256 appId, uint256 appVersion);
        error AppHasBeenDeleted(uint256 appId);
        error DelegateeNotAssociatedWithApp(address delegatee);
        error PkpNotPermittedForAppVersion(uint256 pkpTokenId, uint256 appId, uint256 appVersion);
        error PolicyParameterNotSet(
            uint256 pkpTokenId,
            uint256 appId,
            uint256 appVersion,
            string policyIpfsCid,
            string parameterName
        );
    }
}

/// Solidity type of a stored policy parameter.
///
/// The discriminants are the registry's `paramType` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParamType {
    Int256 = 0,
    Int256Array = 1,
    Uint256 = 2,
    Uint256Array = 3,
    Bool = 4,
    BoolArray = 5,
    Address = 6,
    AddressArray = 7,
    String = 8,
    StringArray = 9,
    Bytes = 10,
    BytesArray = 11,
}

impl TryFrom<u8> for ParamType {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        Ok(match code {
            0 => Self::Int256,
            1 => Self::Int256Array,
            2 => Self::Uint256,
            3 => Self::Uint256Array,
            4 => Self::Bool,
            5 => Self::BoolArray,
            6 => Self::Address,
            7 => Self::AddressArray,
            8 => Self::String,
            9 => Self::StringArray,
            10 => Self::Bytes,
            11 => Self::BytesArray,
            other => return Err(other),
        })
    }
}

// Integers that fit a JSON number stay numbers; larger ones become decimal
// strings so no precision is lost.
fn int_value(v: I256) -> Value {
    i64::try_from(v).map_or_else(|_| Value::String(v.to_string()), Value::from)
}

fn uint_value(v: U256) -> Value {
    u64::try_from(v).map_or_else(|_| Value::String(v.to_string()), Value::from)
}

fn address_value(v: Address) -> Value {
    Value::String(v.to_string())
}

fn bytes_value(v: Bytes) -> Value {
    Value::String(hex::encode_prefixed(v))
}

fn array<T>(items: Vec<T>, f: fn(T) -> Value) -> Value {
    Value::Array(items.into_iter().map(f).collect())
}

impl ParamType {
    /// Decode an ABI-encoded parameter value into JSON.
    pub fn decode(self, data: &[u8]) -> Result<Value, alloy_sol_types::Error> {
        Ok(match self {
            Self::Int256 => int_value(sol_data::Int::<256>::abi_decode(data, true)?),
            Self::Int256Array => array(
                sol_data::Array::<sol_data::Int<256>>::abi_decode(data, true)?,
                int_value,
            ),
            Self::Uint256 => uint_value(sol_data::Uint::<256>::abi_decode(data, true)?),
            Self::Uint256Array => array(
                sol_data::Array::<sol_data::Uint<256>>::abi_decode(data, true)?,
                uint_value,
            ),
            Self::Bool => Value::Bool(sol_data::Bool::abi_decode(data, true)?),
            Self::BoolArray => array(
                sol_data::Array::<sol_data::Bool>::abi_decode(data, true)?,
                Value::Bool,
            ),
            Self::Address => address_value(sol_data::Address::abi_decode(data, true)?),
            Self::AddressArray => array(
                sol_data::Array::<sol_data::Address>::abi_decode(data, true)?,
                address_value,
            ),
            Self::String => Value::String(sol_data::String::abi_decode(data, true)?),
            Self::StringArray => array(
                sol_data::Array::<sol_data::String>::abi_decode(data, true)?,
                Value::String,
            ),
            Self::Bytes => bytes_value(sol_data::Bytes::abi_decode(data, true)?),
            Self::BytesArray => array(
                sol_data::Array::<sol_data::Bytes>::abi_decode(data, true)?,
                bytes_value,
            ),
        })
    }
}
