use thiserror::Error;

/// Failures assembling, signing or broadcasting a transaction.
///
/// Each kind is logged separately; all of them end the execute stage with a
/// failed result. Nothing here is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("chain id unavailable: {0}")]
    ChainId(String),

    #[error("gas estimation failed: {0}")]
    GasEstimation(String),

    #[error("fee data unavailable: {0}")]
    FeeData(String),

    #[error("nonce lookup failed: {0}")]
    Nonce(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("broadcast failed: {0}")]
    Broadcast(String),

    #[error("sponsorship failed: {0}")]
    Sponsorship(String),
}

impl TransactionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChainId(_) => "chain_id",
            Self::GasEstimation(_) => "gas_estimation",
            Self::FeeData(_) => "fee_data",
            Self::Nonce(_) => "nonce",
            Self::Signing(_) => "signing",
            Self::Broadcast(_) => "broadcast",
            Self::Sponsorship(_) => "sponsorship",
        }
    }
}
