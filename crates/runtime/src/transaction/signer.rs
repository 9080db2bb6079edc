//! Delegated signing.
//!
//! The kernel never holds key material. Signing goes to an external key
//! holder, addressed by the delegator key's public key. One key-holder client
//! is shared by the whole process and connected lazily, on first use.

use std::future::Future;

use alloy_primitives::Bytes;
use chain::HttpTransport;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::info;

use super::{TransactionError, UnsignedTransaction};

/// Signs on behalf of delegator keys it custodies.
pub trait KeyHolder: Send + Sync {
    /// Sign a transaction, returning the raw signed transaction.
    fn sign_transaction(
        &self,
        public_key: &Bytes,
        transaction: &UnsignedTransaction,
    ) -> impl Future<Output = Result<Bytes, TransactionError>> + Send;

    /// Sign an EIP-191 personal message.
    fn sign_message(
        &self,
        public_key: &Bytes,
        message: &Bytes,
    ) -> impl Future<Output = Result<Bytes, TransactionError>> + Send;

    /// Sign EIP-712 typed data.
    fn sign_typed_data(
        &self,
        public_key: &Bytes,
        typed_data: &Value,
    ) -> impl Future<Output = Result<Bytes, TransactionError>> + Send;
}

/// A lazily initialized, process-wide value.
///
/// Concurrent callers racing to initialize it all await the same in-flight
/// initialization; exactly one value is ever created. A failed
/// initialization leaves the cell empty so the next caller tries again.
pub struct SignerCell<K> {
    cell: OnceCell<K>,
}

impl<K> SignerCell<K> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub fn get(&self) -> Option<&K> {
        self.cell.get()
    }

    pub async fn get_or_init<F, Fut, E>(&self, init: F) -> Result<&K, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<K, E>>,
    {
        self.cell.get_or_try_init(init).await
    }
}

impl<K> Default for SignerCell<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Handshake {
    #[serde(default)]
    version: Option<String>,
}

/// JSON-RPC client for the key-holder service.
#[derive(Debug)]
pub struct RemoteKeyHolder {
    transport: HttpTransport,
}

impl RemoteKeyHolder {
    /// Connect and handshake with the key holder at `url`.
    #[tracing::instrument(err)]
    pub async fn connect(url: &str) -> Result<Self, TransactionError> {
        let transport =
            HttpTransport::new(url).map_err(|e| TransactionError::Signing(e.to_string()))?;
        let handshake: Handshake = transport
            .request(
                "keyholder_handshake",
                json!([{ "client": "agentkey", "version": env!("CARGO_PKG_VERSION") }]),
            )
            .await
            .map_err(|e| TransactionError::Signing(format!("handshake: {e}")))?;

        info!(url, version = handshake.version.as_deref().unwrap_or("unknown"), "Key holder connected");
        Ok(Self { transport })
    }

    async fn sign(&self, method: &str, params: Value) -> Result<Bytes, TransactionError> {
        self.transport
            .request(method, params)
            .await
            .map_err(|e| TransactionError::Signing(e.to_string()))
    }
}

impl KeyHolder for RemoteKeyHolder {
    async fn sign_transaction(
        &self,
        public_key: &Bytes,
        transaction: &UnsignedTransaction,
    ) -> Result<Bytes, TransactionError> {
        self.sign("keyholder_signTransaction", json!([public_key, transaction]))
            .await
    }

    async fn sign_message(&self, public_key: &Bytes, message: &Bytes) -> Result<Bytes, TransactionError> {
        self.sign("keyholder_signMessage", json!([public_key, message]))
            .await
    }

    async fn sign_typed_data(
        &self,
        public_key: &Bytes,
        typed_data: &Value,
    ) -> Result<Bytes, TransactionError> {
        self.sign("keyholder_signTypedData", json!([public_key, typed_data]))
            .await
    }
}

static KEY_HOLDER: SignerCell<RemoteKeyHolder> = SignerCell::new();

/// The process-wide key-holder client, connecting on first use.
///
/// The first successful connection wins; later calls reuse it whatever
/// `url` they pass.
pub async fn shared_key_holder(url: &str) -> Result<&'static RemoteKeyHolder, TransactionError> {
    KEY_HOLDER.get_or_init(|| RemoteKeyHolder::connect(url)).await
}

/// [`KeyHolder`] backed by the process-wide [`RemoteKeyHolder`].
#[derive(Debug, Clone)]
pub struct LazyKeyHolder {
    url: String,
}

impl LazyKeyHolder {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl KeyHolder for LazyKeyHolder {
    async fn sign_transaction(
        &self,
        public_key: &Bytes,
        transaction: &UnsignedTransaction,
    ) -> Result<Bytes, TransactionError> {
        shared_key_holder(&self.url)
            .await?
            .sign_transaction(public_key, transaction)
            .await
    }

    async fn sign_message(&self, public_key: &Bytes, message: &Bytes) -> Result<Bytes, TransactionError> {
        shared_key_holder(&self.url)
            .await?
            .sign_message(public_key, message)
            .await
    }

    async fn sign_typed_data(
        &self,
        public_key: &Bytes,
        typed_data: &Value,
    ) -> Result<Bytes, TransactionError> {
        shared_key_holder(&self.url)
            .await?
            .sign_typed_data(public_key, typed_data)
            .await
    }
}
