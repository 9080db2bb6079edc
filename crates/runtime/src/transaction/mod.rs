//! Transaction assembly, signing and submission.

mod assembler;
mod error;
pub mod gas;
mod sender;
mod signer;
mod sponsor;

pub use assembler::{UnsignedTransaction, assemble};
pub use error::TransactionError;
pub use sender::TransactionSender;
pub use signer::{KeyHolder, LazyKeyHolder, RemoteKeyHolder, SignerCell, shared_key_holder};
pub use sponsor::{Paymaster, PaymasterClient, SignatureRequest, SponsoredCall};
