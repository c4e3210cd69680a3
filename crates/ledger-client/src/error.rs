use std::time::Duration;

use ledger_codec::CodecError;
use thiserror::Error;

use crate::types::SignatureStatus;

/// Errors an injected transport (request/response or streaming) may return.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("node unavailable: {0}")]
    Unavailable(String),
    #[error("channel not connected")]
    NotConnected,
    #[error("internal transport error: {0}")]
    Internal(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_) | Self::NotConnected)
    }
}

/// Ledger client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The node answered with an `error` object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered with something that is not a valid response to
    /// the request that was sent.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("no new blockhash after {attempts} attempts ({elapsed:?})")]
    BlockhashUnavailable { attempts: u32, elapsed: Duration },

    #[error("transaction {signature} failed: {reason}")]
    TransactionFailed { signature: String, reason: String },

    #[error("transaction not confirmed after {elapsed:?} (last status: {last_status:?})")]
    ConfirmationTimeout {
        elapsed: Duration,
        last_status: Option<SignatureStatus>,
    },

    #[error("operation exceeded deadline of {0:?}")]
    TimedOut(Duration),

    #[error("unknown subscription id {0}")]
    UnknownSubscription(u64),
}

impl ClientError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retryable(),
            Self::BlockhashUnavailable { .. }
            | Self::ConfirmationTimeout { .. }
            | Self::TimedOut(_) => true,
            Self::Codec(_)
            | Self::Rpc { .. }
            | Self::ProtocolViolation(_)
            | Self::TransactionFailed { .. }
            | Self::UnknownSubscription(_) => false,
        }
    }
}
