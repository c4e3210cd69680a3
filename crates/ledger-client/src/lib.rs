//! Async client for a ledger node.
//!
//! Builds on `ledger-codec` for transaction bytes and adds the node-facing
//! half: JSON-RPC calls over an injected [`RpcTransport`], a cached recent
//! blockhash shared by submitters, send-and-confirm with bounded retries,
//! and account-change subscriptions over an injected [`PubSubChannel`] that
//! survive reconnects.

mod blockhash;
pub mod client;
pub mod config;
pub mod error;
pub mod pubsub;
pub mod rpc;
pub mod types;

pub use client::LedgerClient;
pub use config::ClientConfig;
pub use error::{ClientError, TransportError};
pub use pubsub::{
    AccountChangeCallback, ChannelEvent, ProgramAccountChangeCallback, PubSubChannel,
    SubscriptionId, SubscriptionManager,
};
pub use rpc::{RpcErrorObject, RpcRequest, RpcResponse, RpcTransport};
pub use types::{AccountInfo, KeyedAccountInfo, SignatureStatus};

pub use ledger_codec;
