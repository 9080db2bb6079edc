//! Sponsored (gasless) submission through a paymaster.

use std::future::Future;

use alloy_primitives::{Address, B256, Bytes};
use chain::{CallRequest, HttpTransport};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::TransactionError;

/// What the delegator key must sign to authorize a sponsored call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignatureRequest {
    /// An EIP-191 personal message.
    Message { message: Bytes },
    /// EIP-712 typed data.
    TypedData {
        #[serde(rename = "typedData")]
        typed_data: Value,
    },
}

/// A call the paymaster has agreed to sponsor, awaiting a signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsoredCall {
    pub id: String,
    pub signature_request: SignatureRequest,
}

/// A service that pays gas for calls and submits them itself.
pub trait Paymaster: Send + Sync {
    fn prepare(
        &self,
        chain_id: u64,
        from: Address,
        call: &CallRequest,
    ) -> impl Future<Output = Result<SponsoredCall, TransactionError>> + Send;

    /// Submit a prepared call with its signature, returning the hash of the
    /// transaction the paymaster sent.
    fn submit(
        &self,
        call: &SponsoredCall,
        signature: &Bytes,
    ) -> impl Future<Output = Result<B256, TransactionError>> + Send;
}

/// JSON-RPC client for a sponsorship service.
#[derive(Debug)]
pub struct PaymasterClient {
    transport: HttpTransport,
    policy_id: Option<String>,
}

impl PaymasterClient {
    pub fn new(url: &str, api_key: &str) -> Result<Self, TransactionError> {
        let transport = HttpTransport::new(url)
            .map_err(|e| TransactionError::Sponsorship(e.to_string()))?
            .with_bearer(api_key);
        Ok(Self {
            transport,
            policy_id: None,
        })
    }

    /// Sponsor under a specific gas policy.
    pub fn with_policy(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_id = Some(policy_id.into());
        self
    }
}

impl Paymaster for PaymasterClient {
    async fn prepare(
        &self,
        chain_id: u64,
        from: Address,
        call: &CallRequest,
    ) -> Result<SponsoredCall, TransactionError> {
        let params = json!([{
            "chainId": chain_id,
            "from": from,
            "calls": [call],
            "policyId": self.policy_id,
        }]);
        self.transport
            .request("sponsor_prepareCalls", params)
            .await
            .map_err(|e| TransactionError::Sponsorship(format!("prepare: {e}")))
    }

    async fn submit(&self, call: &SponsoredCall, signature: &Bytes) -> Result<B256, TransactionError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Submitted {
            tx_hash: B256,
        }

        let submitted: Submitted = self
            .transport
            .request(
                "sponsor_sendPreparedCalls",
                json!([{ "id": call.id, "signature": signature }]),
            )
            .await
            .map_err(|e| TransactionError::Sponsorship(format!("submit: {e}")))?;
        Ok(submitted.tx_hash)
    }
}
