use thiserror::Error;

use crate::transaction::TransactionError;

/// Runtime errors.
///
/// These surface while building the runtime (registering abilities,
/// opening stores, connecting). Invocations never return them: every failure
/// inside an invocation becomes a failed result.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("unknown ability: {0}")]
    UnknownAbility(String),

    #[error(transparent)]
    Schema(#[from] schema::Error),

    #[error(transparent)]
    Policy(#[from] policy::Error),

    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Chain(#[from] chain::Error),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

pub type Result<T> = std::result::Result<T, Error>;
