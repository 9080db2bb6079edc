//! Turning a call into a fully populated EIP-1559 transaction.

use alloy_primitives::{Address, Bytes, U256};
use chain::{CallRequest, Provider};
use serde::{Serialize, Serializer};
use tracing::{debug, info};

use super::TransactionError;
use super::gas::correct_fees;

fn quantity<S: Serializer, T: Copy + Into<u128>>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    U256::from((*value).into()).serialize(serializer)
}

/// An unsigned type-2 transaction, as handed to the key holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    #[serde(serialize_with = "quantity")]
    pub chain_id: u64,
    #[serde(serialize_with = "quantity")]
    pub nonce: u64,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    #[serde(rename = "gas", serialize_with = "quantity")]
    pub gas_limit: u64,
    #[serde(serialize_with = "quantity")]
    pub max_fee_per_gas: u128,
    #[serde(serialize_with = "quantity")]
    pub max_priority_fee_per_gas: u128,
}

/// Populate chain id, nonce, gas limit and fees for `call` sent from `from`.
///
/// Each node call is made once. Fees go through [`correct_fees`].
#[tracing::instrument(skip_all, fields(from = %from, to = %call.to), err)]
pub async fn assemble<P: Provider>(
    provider: &P,
    from: Address,
    call: &CallRequest,
) -> Result<UnsignedTransaction, TransactionError> {
    let call = call.clone().with_from(from);

    let chain_id = provider
        .chain_id()
        .await
        .map_err(|e| TransactionError::ChainId(e.to_string()))?;
    let nonce = provider
        .transaction_count(from)
        .await
        .map_err(|e| TransactionError::Nonce(e.to_string()))?;
    let gas_limit = provider
        .estimate_gas(&call)
        .await
        .map_err(|e| TransactionError::GasEstimation(e.to_string()))?;
    let gas_price = provider
        .gas_price()
        .await
        .map_err(|e| TransactionError::FeeData(e.to_string()))?;
    let estimate = provider
        .fee_estimate()
        .await
        .map_err(|e| TransactionError::FeeData(e.to_string()))?;

    let fees = correct_fees(gas_price, estimate);
    if fees != estimate {
        info!(
            gas_price,
            estimated = estimate.max_fee_per_gas,
            corrected = fees.max_fee_per_gas,
            "Corrected inflated fee estimate"
        );
    }
    debug!(chain_id, nonce, gas_limit, "Transaction assembled");

    Ok(UnsignedTransaction {
        chain_id,
        nonce,
        from,
        to: call.to,
        value: call.value.unwrap_or_default(),
        data: call.data,
        gas_limit,
        max_fee_per_gas: fees.max_fee_per_gas,
        max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
    })
}
