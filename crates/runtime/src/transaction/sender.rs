//! Sending a call on behalf of a delegator key.

use alloy_primitives::{B256, Bytes};
use chain::{CallRequest, Provider};
use schema::DelegatorKey;
use tracing::{info, warn};

use super::{KeyHolder, Paymaster, SignatureRequest, TransactionError, UnsignedTransaction, assemble};

/// Sends calls either signed locally through the key holder or, when a
/// paymaster is configured, sponsored. Both paths return the transaction
/// hash.
#[derive(Debug)]
pub struct TransactionSender<K, M> {
    key_holder: K,
    paymaster: Option<M>,
}

impl<K: KeyHolder, M: Paymaster> TransactionSender<K, M> {
    pub fn new(key_holder: K) -> Self {
        Self {
            key_holder,
            paymaster: None,
        }
    }

    /// Route every call through `paymaster` instead of paying gas.
    pub fn with_paymaster(mut self, paymaster: M) -> Self {
        self.paymaster = Some(paymaster);
        self
    }

    pub fn is_sponsored(&self) -> bool {
        self.paymaster.is_some()
    }

    pub fn key_holder(&self) -> &K {
        &self.key_holder
    }

    pub async fn send<P: Provider>(
        &self,
        provider: &P,
        key: &DelegatorKey,
        call: &CallRequest,
    ) -> Result<B256, TransactionError> {
        let sent = match &self.paymaster {
            Some(paymaster) => self.send_sponsored(paymaster, provider, key, call).await,
            None => self.send_signed(provider, key, call).await,
        };
        if let Err(e) = &sent {
            warn!(kind = e.kind(), error = %e, "Transaction not sent");
        }
        sent
    }

    #[tracing::instrument(skip_all, fields(from = %key.address, to = %call.to))]
    async fn send_signed<P: Provider>(
        &self,
        provider: &P,
        key: &DelegatorKey,
        call: &CallRequest,
    ) -> Result<B256, TransactionError> {
        let transaction = assemble(provider, key.address, call).await?;
        let raw = self.sign_transaction(key, &transaction).await?;
        let hash = self.broadcast(provider, &raw).await?;
        info!(tx_hash = %hash, nonce = transaction.nonce, "Transaction broadcast");
        Ok(hash)
    }

    #[tracing::instrument(skip_all, err)]
    async fn sign_transaction(
        &self,
        key: &DelegatorKey,
        transaction: &UnsignedTransaction,
    ) -> Result<Bytes, TransactionError> {
        self.key_holder
            .sign_transaction(&key.public_key, transaction)
            .await
    }

    #[tracing::instrument(skip_all, err)]
    async fn broadcast<P: Provider>(
        &self,
        provider: &P,
        raw: &Bytes,
    ) -> Result<B256, TransactionError> {
        provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| TransactionError::Broadcast(e.to_string()))
    }

    #[tracing::instrument(skip_all, fields(from = %key.address, to = %call.to), err)]
    async fn send_sponsored<P: Provider>(
        &self,
        paymaster: &M,
        provider: &P,
        key: &DelegatorKey,
        call: &CallRequest,
    ) -> Result<B256, TransactionError> {
        let chain_id = provider
            .chain_id()
            .await
            .map_err(|e| TransactionError::ChainId(e.to_string()))?;
        let prepared = paymaster.prepare(chain_id, key.address, call).await?;

        let signature = match &prepared.signature_request {
            SignatureRequest::Message { message } => {
                self.key_holder.sign_message(&key.public_key, message).await?
            }
            SignatureRequest::TypedData { typed_data } => {
                self.key_holder
                    .sign_typed_data(&key.public_key, typed_data)
                    .await?
            }
        };

        let hash = paymaster.submit(&prepared, &signature).await?;
        info!(tx_hash = %hash, id = %prepared.id, "Sponsored call submitted");
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockKeyHolder, MockPaymaster, MockProvider, delegator_key};
    use alloy_primitives::Address;

    fn call() -> CallRequest {
        CallRequest::new(Address::repeat_byte(0x33), vec![0xaa])
    }

    #[tokio::test]
    async fn signs_and_broadcasts() {
        let provider = MockProvider::new();
        let sender = TransactionSender::<_, MockPaymaster>::new(MockKeyHolder::new());

        let hash = sender.send(&provider, &delegator_key(), &call()).await.unwrap();
        let broadcasts = provider.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(hash, provider.hash_of(&broadcasts[0]));
        assert_eq!(sender.key_holder().signed_transactions().len(), 1);
    }

    #[tokio::test]
    async fn sponsored_path_skips_gas_assembly() {
        let provider = MockProvider::new().failing_estimate_gas();
        let paymaster = MockPaymaster::new();
        let sender = TransactionSender::new(MockKeyHolder::new()).with_paymaster(paymaster);

        let hash = sender.send(&provider, &delegator_key(), &call()).await.unwrap();
        assert_eq!(hash, MockPaymaster::TX_HASH);
        assert!(provider.broadcasts().is_empty());
        assert_eq!(sender.key_holder().signed_messages().len(), 1);
    }

    #[tokio::test]
    async fn broadcast_failure_is_distinguished() {
        let provider = MockProvider::new().failing_broadcast();
        let sender = TransactionSender::<_, MockPaymaster>::new(MockKeyHolder::new());

        let err = sender.send(&provider, &delegator_key(), &call()).await.unwrap_err();
        assert!(matches!(err, TransactionError::Broadcast(_)));
    }

    #[tokio::test]
    async fn signing_failure_is_distinguished() {
        let provider = MockProvider::new();
        let sender = TransactionSender::<_, MockPaymaster>::new(MockKeyHolder::refusing());

        let err = sender.send(&provider, &delegator_key(), &call()).await.unwrap_err();
        assert!(matches!(err, TransactionError::Signing(_)));
        assert!(provider.broadcasts().is_empty());
    }
}
