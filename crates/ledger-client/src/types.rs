//! Values the node returns, decoded from their JSON forms.

use std::fmt;

use ledger_codec::{Blockhash, Identity};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// Snapshot of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub executable: bool,
    pub owner: Identity,
    #[serde(rename = "lamports")]
    pub balance: u64,
    #[serde(deserialize_with = "account_data")]
    pub data: Vec<u8>,
}

/// An account snapshot tagged with the account it belongs to, as delivered
/// by program-level notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedAccountInfo {
    #[serde(rename = "pubkey")]
    pub account_id: Identity,
    #[serde(rename = "account")]
    pub account_info: AccountInfo,
}

/// Account data arrives either as a byte array or as a Base58 string.
fn account_data<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Bytes(Vec<u8>),
        Base58(String),
        Tagged(String, String),
    }

    let decode = |text: &str| {
        bs58::decode(text)
            .into_vec()
            .map_err(|e| serde::de::Error::custom(format!("account data: {e}")))
    };
    match Encoded::deserialize(deserializer)? {
        Encoded::Bytes(bytes) => Ok(bytes),
        Encoded::Base58(text) => decode(&text),
        Encoded::Tagged(text, encoding) if encoding == "base58" => decode(&text),
        Encoded::Tagged(_, encoding) => Err(serde::de::Error::custom(format!(
            "unsupported account data encoding {encoding}"
        ))),
    }
}

/// Newer nodes wrap some results as `{"context": {...}, "value": ...}`;
/// return the inner value, or the result unchanged if it is not wrapped.
pub(crate) fn strip_context(result: Value) -> Value {
    match result {
        Value::Object(mut map) if map.contains_key("context") && map.contains_key("value") => {
            map.remove("value").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Result of `getRecentBlockhash`: either `[blockhash, feeCalculator]` or
/// `{"blockhash": ..., "feeCalculator": ...}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RecentBlockhash {
    Object { blockhash: String },
    Pair(String, Value),
}

impl RecentBlockhash {
    pub(crate) fn blockhash(&self) -> Result<Blockhash, ClientError> {
        let text = match self {
            Self::Object { blockhash } | Self::Pair(blockhash, _) => blockhash,
        };
        text.parse()
            .map_err(|e| ClientError::ProtocolViolation(format!("recent blockhash: {e}")))
    }
}

/// Confirmation state of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureStatus {
    Confirmed,
    /// The node has not seen the signature (yet).
    NotFound,
    /// The transaction lost a race for an account lock; resending may work.
    AccountInUse,
    /// Definitive on-ledger failure.
    Failed(String),
}

impl SignatureStatus {
    /// Decode the `getSignatureStatus` result.
    ///
    /// Accepts the plain string form (`"Confirmed"`, `"SignatureNotFound"`,
    /// `"AccountInUse"`, any other string is a failure) as well as the
    /// result form (`null`, `{"Ok": null}`, `{"Err": ...}`).
    pub fn from_rpc(value: &Value) -> Result<Self, ClientError> {
        match value {
            Value::Null => Ok(Self::NotFound),
            Value::String(text) => Ok(match text.as_str() {
                "Confirmed" => Self::Confirmed,
                "SignatureNotFound" => Self::NotFound,
                "AccountInUse" => Self::AccountInUse,
                other => Self::Failed(other.to_string()),
            }),
            Value::Object(map) if map.contains_key("Ok") => Ok(Self::Confirmed),
            Value::Object(map) => match map.get("Err") {
                Some(Value::String(cause)) if cause == "AccountInUse" => Ok(Self::AccountInUse),
                Some(Value::String(cause)) => Ok(Self::Failed(cause.clone())),
                Some(cause) => Ok(Self::Failed(cause.to_string())),
                None => Err(ClientError::ProtocolViolation(format!(
                    "unrecognized signature status {value}"
                ))),
            },
            other => Err(ClientError::ProtocolViolation(format!(
                "unrecognized signature status {other}"
            ))),
        }
    }

    /// Confirmed, or failed for a reason other than an account lock.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed(_))
    }
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed => f.write_str("Confirmed"),
            Self::NotFound => f.write_str("SignatureNotFound"),
            Self::AccountInUse => f.write_str("AccountInUse"),
            Self::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}
