use thiserror::Error;

use crate::identity::Identity;

/// Transaction codec errors.
///
/// Every variant is a malformed-input fault: detected locally, returned
/// synchronously and never worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid keypair: {0}")]
    InvalidKeypair(String),

    #[error("insufficient signatures: {required} signer(s) required, {provided} provided")]
    InsufficientSignatures { required: usize, provided: usize },

    #[error("unknown signer: {0}")]
    UnknownSigner(Identity),

    #[error("transaction has not been fully signed")]
    UnsignedTransaction,

    #[error("transaction too large: {size} bytes exceeds maximum of {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("transaction has no recent blockhash")]
    MissingBlockhash,

    #[error("transaction has no instructions")]
    NoInstructions,

    #[error("too many account keys: {0} (maximum 256)")]
    TooManyAccounts(usize),

    #[error("invalid account order: {0}")]
    InvalidAccountOrder(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}
