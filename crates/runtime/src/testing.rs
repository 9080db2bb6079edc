//! In-memory collaborators for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use alloy_sol_types::{SolCall, SolType, sol_data};
use chain::registry::IDelegationRegistry::{
    PolicyParameter, PolicyWithParameters, validateAbilityExecutionAndGetPoliciesCall,
};
use chain::{CallRequest, FeeEstimate, JsonRpcError, Provider};
use schema::{DelegatorKey, ExecutionContext};
use serde_json::Value;

use crate::ability::erc20::IERC20;
use crate::transaction::{
    KeyHolder, Paymaster, SignatureRequest, SponsoredCall, TransactionError, UnsignedTransaction,
};

pub const DELEGATOR: Address = Address::new([0x11; 20]);
pub const DELEGATEE: Address = Address::new([0x22; 20]);
pub const ROUTER: Address = Address::new([0x33; 20]);
pub const TOKEN_IN: Address = Address::new([0x44; 20]);
pub const TOKEN_OUT: Address = Address::new([0x55; 20]);
pub const REGISTRY: Address = Address::new([0x99; 20]);
pub const APP_ID: u64 = 7;

pub fn delegator_key() -> DelegatorKey {
    DelegatorKey {
        token_id: U256::from(42),
        address: DELEGATOR,
        public_key: Bytes::from_static(&[0x04, 0xaa, 0xbb]),
    }
}

pub fn context(ability: &str, app_version: u64) -> ExecutionContext {
    ExecutionContext {
        delegator_key: delegator_key(),
        delegatee_address: DELEGATEE,
        app_id: APP_ID,
        app_version,
        ability_identifier: ability.to_string(),
    }
}

struct State {
    chain_id: u64,
    gas_price: u128,
    fees: FeeEstimate,
    nonce: u64,
    calls: HashMap<(Address, [u8; 4]), Bytes>,
    broadcasts: Vec<Bytes>,
    fail_chain_id: bool,
    fail_estimate_gas: bool,
    fail_broadcast: bool,
}

/// A node with canned `eth_call` answers keyed by contract and selector.
/// Broadcasts are recorded, never sent. Clones share state.
#[derive(Clone)]
pub struct MockProvider {
    state: Arc<Mutex<State>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                chain_id: 8453,
                gas_price: 1_000_000_000,
                fees: FeeEstimate {
                    max_fee_per_gas: 2_000_000_000,
                    max_priority_fee_per_gas: 1_000_000_000,
                },
                nonce: 0,
                calls: HashMap::new(),
                broadcasts: Vec::new(),
                fail_chain_id: false,
                fail_estimate_gas: false,
                fail_broadcast: false,
            })),
        }
    }

    fn update(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_gas_price(self, gas_price: u128) -> Self {
        self.update(|s| s.gas_price = gas_price)
    }

    pub fn with_fee_estimate(self, max_fee: u128, priority_fee: u128) -> Self {
        self.update(|s| {
            s.fees = FeeEstimate {
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: priority_fee,
            }
        })
    }

    pub fn with_nonce(self, nonce: u64) -> Self {
        self.update(|s| s.nonce = nonce)
    }

    pub fn failing_chain_id(self) -> Self {
        self.update(|s| s.fail_chain_id = true)
    }

    pub fn failing_estimate_gas(self) -> Self {
        self.update(|s| s.fail_estimate_gas = true)
    }

    pub fn failing_broadcast(self) -> Self {
        self.update(|s| s.fail_broadcast = true)
    }

    pub fn with_call(self, to: Address, selector: [u8; 4], output: Vec<u8>) -> Self {
        self.update(|s| {
            s.calls.insert((to, selector), output.into());
        })
    }

    /// Answer `balanceOf` and `allowance` for `token`, whoever asks.
    pub fn with_erc20(self, token: Address, balance: U256, allowance: U256) -> Self {
        self.with_call(
            token,
            IERC20::balanceOfCall::SELECTOR,
            IERC20::balanceOfCall::abi_encode_returns(&(balance,)),
        )
        .with_call(
            token,
            IERC20::allowanceCall::SELECTOR,
            IERC20::allowanceCall::abi_encode_returns(&(allowance,)),
        )
    }

    /// Answer the delegation registry with a permitted delegation.
    pub fn with_delegation(self, app_version: u64, policies: Vec<PolicyWithParameters>) -> Self {
        self.with_call(
            REGISTRY,
            validateAbilityExecutionAndGetPoliciesCall::SELECTOR,
            validateAbilityExecutionAndGetPoliciesCall::abi_encode_returns(&(
                true,
                U256::from(APP_ID),
                U256::from(app_version),
                policies,
            )),
        )
    }

    pub fn broadcasts(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    pub fn hash_of(&self, raw: &Bytes) -> B256 {
        keccak256(raw)
    }
}

impl Provider for MockProvider {
    async fn chain_id(&self) -> chain::Result<u64> {
        let state = self.state.lock().unwrap();
        if state.fail_chain_id {
            return Err(chain::Error::JsonRpc(JsonRpcError {
                code: -32603,
                message: "internal error".into(),
                data: None,
            }));
        }
        Ok(state.chain_id)
    }

    async fn gas_price(&self) -> chain::Result<u128> {
        Ok(self.state.lock().unwrap().gas_price)
    }

    async fn fee_estimate(&self) -> chain::Result<FeeEstimate> {
        Ok(self.state.lock().unwrap().fees)
    }

    async fn transaction_count(&self, _: Address) -> chain::Result<u64> {
        Ok(self.state.lock().unwrap().nonce)
    }

    async fn estimate_gas(&self, _: &CallRequest) -> chain::Result<u64> {
        if self.state.lock().unwrap().fail_estimate_gas {
            return Err(chain::Error::JsonRpc(JsonRpcError {
                code: -32000,
                message: "gas required exceeds allowance".into(),
                data: None,
            }));
        }
        Ok(120_000)
    }

    async fn call(&self, request: &CallRequest) -> chain::Result<Bytes> {
        let selector: [u8; 4] = request
            .data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .unwrap_or_default();
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&(request.to, selector))
            .cloned()
            .ok_or_else(|| {
                chain::Error::JsonRpc(JsonRpcError {
                    code: 3,
                    message: "execution reverted".into(),
                    data: None,
                })
            })
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> chain::Result<B256> {
        let mut state = self.state.lock().unwrap();
        if state.fail_broadcast {
            return Err(chain::Error::JsonRpc(JsonRpcError {
                code: -32000,
                message: "nonce too low".into(),
                data: None,
            }));
        }
        state.broadcasts.push(raw.clone());
        Ok(keccak256(raw))
    }
}

pub fn uint_param(name: &str, value: u64) -> PolicyParameter {
    PolicyParameter {
        name: name.to_string(),
        paramType: 2,
        value: sol_data::Uint::<256>::abi_encode(&U256::from(value)).into(),
    }
}

pub fn string_array_param(name: &str, values: &[&str]) -> PolicyParameter {
    let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    PolicyParameter {
        name: name.to_string(),
        paramType: 9,
        value: sol_data::Array::<sol_data::String>::abi_encode(&values).into(),
    }
}

pub fn grant(policy: &str, parameters: Vec<PolicyParameter>) -> PolicyWithParameters {
    PolicyWithParameters {
        policyIpfsCid: policy.to_string(),
        parameters,
    }
}

#[derive(Default)]
struct Signed {
    transactions: Vec<UnsignedTransaction>,
    messages: Vec<Bytes>,
}

/// Key holder that signs everything with a fake signature, or refuses.
#[derive(Clone, Default)]
pub struct MockKeyHolder {
    signed: Arc<Mutex<Signed>>,
    refuse: bool,
}

impl MockKeyHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn signed_transactions(&self) -> Vec<UnsignedTransaction> {
        self.signed.lock().unwrap().transactions.clone()
    }

    pub fn signed_messages(&self) -> Vec<Bytes> {
        self.signed.lock().unwrap().messages.clone()
    }

    fn check(&self) -> Result<(), TransactionError> {
        if self.refuse {
            return Err(TransactionError::Signing("key holder unavailable".into()));
        }
        Ok(())
    }
}

impl KeyHolder for MockKeyHolder {
    async fn sign_transaction(
        &self,
        _: &Bytes,
        transaction: &UnsignedTransaction,
    ) -> Result<Bytes, TransactionError> {
        self.check()?;
        self.signed
            .lock()
            .unwrap()
            .transactions
            .push(transaction.clone());
        Ok(serde_json::to_vec(transaction).unwrap().into())
    }

    async fn sign_message(&self, _: &Bytes, message: &Bytes) -> Result<Bytes, TransactionError> {
        self.check()?;
        self.signed.lock().unwrap().messages.push(message.clone());
        Ok(Bytes::from_static(&[0x5a; 65]))
    }

    async fn sign_typed_data(&self, _: &Bytes, _: &Value) -> Result<Bytes, TransactionError> {
        self.check()?;
        Ok(Bytes::from_static(&[0x5b; 65]))
    }
}

/// Paymaster that asks for a message signature and pretends to submit.
#[derive(Clone, Default)]
pub struct MockPaymaster {
    submitted: Arc<Mutex<Vec<Bytes>>>,
}

impl MockPaymaster {
    pub const TX_HASH: B256 = B256::new([0x77; 32]);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> Vec<Bytes> {
        self.submitted.lock().unwrap().clone()
    }
}

impl Paymaster for MockPaymaster {
    async fn prepare(
        &self,
        _: u64,
        _: Address,
        call: &CallRequest,
    ) -> Result<SponsoredCall, TransactionError> {
        Ok(SponsoredCall {
            id: "op-1".into(),
            signature_request: SignatureRequest::Message {
                message: Bytes::copy_from_slice(keccak256(&call.data).as_slice()),
            },
        })
    }

    async fn submit(&self, _: &SponsoredCall, signature: &Bytes) -> Result<B256, TransactionError> {
        self.submitted.lock().unwrap().push(signature.clone());
        Ok(Self::TX_HASH)
    }
}
