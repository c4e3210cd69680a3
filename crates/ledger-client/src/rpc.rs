//! JSON-RPC 2.0 envelope and the request/response transport seam.
//!
//! The client never opens sockets itself. It hands a fully built
//! [`RpcRequest`] to an injected [`RpcTransport`] and validates whatever
//! bytes come back against that request.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ClientError, TransportError};

pub const JSONRPC_VERSION: &str = "2.0";

/// Node methods the client invokes.
pub mod methods {
    pub const GET_ACCOUNT_INFO: &str = "getAccountInfo";
    pub const GET_BALANCE: &str = "getBalance";
    pub const GET_RECENT_BLOCKHASH: &str = "getRecentBlockhash";
    pub const GET_SIGNATURE_STATUS: &str = "getSignatureStatus";
    pub const GET_TRANSACTION_COUNT: &str = "getTransactionCount";
    pub const REQUEST_AIRDROP: &str = "requestAirdrop";
    pub const SEND_TRANSACTION: &str = "sendTransaction";

    pub const ACCOUNT_SUBSCRIBE: &str = "accountSubscribe";
    pub const ACCOUNT_UNSUBSCRIBE: &str = "accountUnsubscribe";
    pub const ACCOUNT_NOTIFICATION: &str = "accountNotification";
    pub const PROGRAM_SUBSCRIBE: &str = "programSubscribe";
    pub const PROGRAM_UNSUBSCRIBE: &str = "programUnsubscribe";
    pub const PROGRAM_NOTIFICATION: &str = "programNotification";
}

/// A JSON-RPC 2.0 request. Every request gets a fresh random id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }

    /// Validate a raw response body against this request and return its
    /// `result` value.
    pub fn decode_response(&self, body: &[u8]) -> Result<Value, ClientError> {
        let response: RpcResponse = serde_json::from_slice(body).map_err(|e| {
            ClientError::ProtocolViolation(format!("{}: malformed response: {e}", self.method))
        })?;

        if let Some(error) = response.error {
            return Err(ClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        if response.id != Value::String(self.id.clone()) {
            return Err(ClientError::ProtocolViolation(format!(
                "{}: response id {} does not match request id {}",
                self.method, response.id, self.id
            )));
        }
        response.result.ok_or_else(|| {
            ClientError::ProtocolViolation(format!(
                "{}: response has neither result nor error",
                self.method
            ))
        })
    }
}

/// A JSON-RPC 2.0 response.
///
/// `result: null` is a legitimate answer (e.g. an unknown signature), so a
/// present-but-null result is kept as `Some(Value::Null)` and only a missing
/// field decodes to `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Value,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id,
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Request/response transport to a node.
///
/// Implementations send the serialized request and return the raw response
/// body; they do not interpret it.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn request(&self, request: &RpcRequest) -> Result<Vec<u8>, TransportError>;
}

#[async_trait]
impl<T: RpcTransport + ?Sized> RpcTransport for std::sync::Arc<T> {
    async fn request(&self, request: &RpcRequest) -> Result<Vec<u8>, TransportError> {
        (**self).request(request).await
    }
}
