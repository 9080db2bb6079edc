//! EVM node access.

use std::future::Future;

use alloy_primitives::{Address, B256, Bytes, U256};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};
use crate::transport::HttpTransport;

/// A read-only call or the call part of a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub to: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    pub data: Bytes,
}

impl CallRequest {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to,
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }
}

/// EIP-1559 fee fields as estimated by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl FeeEstimate {
    /// Twice the latest base fee, plus the suggested tip.
    pub fn from_base_fee(base_fee: u128, priority_fee: u128) -> Self {
        Self {
            max_fee_per_gas: base_fee.saturating_mul(2).saturating_add(priority_fee),
            max_priority_fee_per_gas: priority_fee,
        }
    }
}

/// What the kernel needs from an EVM node.
///
/// Every method is one request; implementations must not retry.
pub trait Provider: Send + Sync {
    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Legacy gas price, in wei.
    fn gas_price(&self) -> impl Future<Output = Result<u128>> + Send;

    fn fee_estimate(&self) -> impl Future<Output = Result<FeeEstimate>> + Send;

    /// Nonce for the next transaction from `address`, counting pending ones.
    fn transaction_count(&self, address: Address) -> impl Future<Output = Result<u64>> + Send;

    fn estimate_gas(&self, request: &CallRequest) -> impl Future<Output = Result<u64>> + Send;

    fn call(&self, request: &CallRequest) -> impl Future<Output = Result<Bytes>> + Send;

    /// Broadcast a signed transaction, returning its hash.
    fn send_raw_transaction(&self, raw: &Bytes) -> impl Future<Output = Result<B256>> + Send;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Block {
    #[serde(default)]
    base_fee_per_gas: Option<U256>,
}

fn narrow<T: TryFrom<U256>>(value: U256, what: &str) -> Result<T> {
    T::try_from(value).map_err(|_| Error::InvalidResponse(format!("{what} out of range: {value}")))
}

/// [`Provider`] over a node's HTTP JSON-RPC endpoint.
#[derive(Debug)]
pub struct RpcProvider {
    transport: HttpTransport,
}

impl RpcProvider {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Ok(Self::with_transport(HttpTransport::new(url)?))
    }

    pub fn with_transport(transport: HttpTransport) -> Self {
        Self { transport }
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    async fn quantity(&self, method: &str, params: serde_json::Value, what: &str) -> Result<U256> {
        self.transport
            .request::<_, U256>(method, params)
            .await
            .map_err(|e| match e {
                Error::Serialize(_) => Error::InvalidResponse(format!("{what} is not a quantity")),
                e => e,
            })
    }
}

impl Provider for RpcProvider {
    async fn chain_id(&self) -> Result<u64> {
        let id = self.quantity("eth_chainId", json!([]), "chain id").await?;
        narrow(id, "chain id")
    }

    async fn gas_price(&self) -> Result<u128> {
        let price = self.quantity("eth_gasPrice", json!([]), "gas price").await?;
        narrow(price, "gas price")
    }

    async fn fee_estimate(&self) -> Result<FeeEstimate> {
        let block: Block = self
            .transport
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| Error::InvalidResponse("latest block has no base fee".into()))?;
        let priority = self
            .quantity("eth_maxPriorityFeePerGas", json!([]), "priority fee")
            .await?;
        Ok(FeeEstimate::from_base_fee(
            narrow(base_fee, "base fee")?,
            narrow(priority, "priority fee")?,
        ))
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        let count = self
            .quantity("eth_getTransactionCount", json!([address, "pending"]), "nonce")
            .await?;
        narrow(count, "nonce")
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64> {
        let gas = self
            .quantity("eth_estimateGas", json!([request]), "gas estimate")
            .await?;
        narrow(gas, "gas estimate")
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes> {
        self.transport
            .request("eth_call", json!([request, "latest"]))
            .await
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256> {
        self.transport
            .request("eth_sendRawTransaction", json!([raw]))
            .await
    }
}

/// Providers keyed by network name, e.g. `base` or `ethereum`.
#[derive(Debug)]
pub struct Networks<P> {
    providers: IndexMap<String, P>,
}

impl<P> Default for Networks<P> {
    fn default() -> Self {
        Self {
            providers: IndexMap::new(),
        }
    }
}

impl<P> Networks<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, provider: P) {
        self.providers.insert(name.into(), provider);
    }

    pub fn with(mut self, name: impl Into<String>, provider: P) -> Self {
        self.insert(name, provider);
        self
    }

    pub fn get(&self, name: &str) -> Result<&P> {
        self.providers
            .get(name)
            .ok_or_else(|| Error::UnknownNetwork(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}
