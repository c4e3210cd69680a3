//! In-memory transports for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use ledger_client::rpc::methods;
use ledger_client::{
    AccountInfo, ChannelEvent, PubSubChannel, RpcRequest, RpcResponse, RpcTransport,
    TransportError,
};
use ledger_codec::{AccountRef, Blockhash, Identity, Instruction, KeyPair, Transaction};
use parking_lot::Mutex;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Request/response mock
// ---------------------------------------------------------------------------

/// One scripted answer to a request.
#[derive(Debug, Clone)]
pub enum Reply {
    Result(Value),
    Error { code: i64, message: String },
    /// Response body sent verbatim.
    Raw(Vec<u8>),
    Transport(TransportError),
}

/// Scripted node. Each method answers from its queue; once the queue is
/// drained the last answer repeats. `sendTransaction` without a script
/// answers with the first signature of the submitted transaction.
#[derive(Clone, Default)]
pub struct MockRpc {
    state: Arc<Mutex<RpcState>>,
}

#[derive(Default)]
struct RpcState {
    scripted: HashMap<String, VecDeque<Reply>>,
    last: HashMap<String, Reply>,
    requests: Vec<RpcRequest>,
}

impl RpcState {
    fn next_reply(&mut self, request: &RpcRequest) -> Reply {
        let queued = self
            .scripted
            .get_mut(&request.method)
            .and_then(VecDeque::pop_front);
        if let Some(reply) = queued {
            self.last.insert(request.method.clone(), reply.clone());
            return reply;
        }
        if let Some(reply) = self.last.get(&request.method) {
            return reply.clone();
        }
        if request.method == methods::SEND_TRANSACTION {
            return match signature_of_submission(request) {
                Some(signature) => Reply::Result(json!(signature)),
                None => Reply::Error {
                    code: -32602,
                    message: "invalid transaction".into(),
                },
            };
        }
        Reply::Error {
            code: -32601,
            message: format!("method not found: {}", request.method),
        }
    }
}

fn signature_of_submission(request: &RpcRequest) -> Option<String> {
    let wire = decode_wire(request)?;
    let tx = Transaction::parse(&wire).ok()?;
    tx.signature().map(|sig| bs58::encode(sig).into_string())
}

fn decode_wire(request: &RpcRequest) -> Option<Vec<u8>> {
    let encoded = request.params.first()?.as_str()?;
    bs58::decode(encoded).into_vec().ok()
}

impl MockRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, method: &str, replies: impl IntoIterator<Item = Reply>) -> &Self {
        self.state
            .lock()
            .scripted
            .entry(method.to_string())
            .or_default()
            .extend(replies);
        self
    }

    pub fn requests(&self, method: &str) -> Vec<RpcRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|req| req.method == method)
            .cloned()
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.requests(method).len()
    }

    /// Every transaction submitted through `sendTransaction`, decoded.
    pub fn sent_transactions(&self) -> Vec<Transaction> {
        self.requests(methods::SEND_TRANSACTION)
            .iter()
            .filter_map(decode_wire)
            .map(|wire| Transaction::parse(&wire).expect("client sent unparseable bytes"))
            .collect()
    }
}

#[async_trait]
impl RpcTransport for MockRpc {
    async fn request(&self, request: &RpcRequest) -> Result<Vec<u8>, TransportError> {
        let reply = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            state.next_reply(request)
        };
        let id = json!(request.id);
        let response = match reply {
            Reply::Result(result) => RpcResponse::success(id, result),
            Reply::Error { code, message } => RpcResponse::failure(id, code, message),
            Reply::Raw(body) => return Ok(body),
            Reply::Transport(err) => return Err(err),
        };
        Ok(serde_json::to_vec(&response).expect("response serializes"))
    }
}

// ---------------------------------------------------------------------------
// Streaming channel mock
// ---------------------------------------------------------------------------

/// First id the mock node hands out for a subscription.
pub const FIRST_REMOTE_ID: u64 = 1000;

#[derive(Clone, Default)]
pub struct MockChannel {
    state: Arc<Mutex<ChannelState>>,
}

#[derive(Default)]
struct ChannelState {
    connected: bool,
    refuse_connect: bool,
    connects: usize,
    closes: usize,
    issued: u64,
    calls: Vec<(String, Vec<Value>)>,
    failing_targets: HashSet<String>,
    fail_unsubscribe: bool,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the connection dropping underneath the client.
    pub fn drop_connection(&self) {
        self.state.lock().connected = false;
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.state.lock().refuse_connect = refuse;
    }

    pub fn fail_subscribe_for(&self, target: &Identity) {
        self.state.lock().failing_targets.insert(target.to_base58());
    }

    pub fn clear_subscribe_failures(&self) {
        self.state.lock().failing_targets.clear();
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.state.lock().fail_unsubscribe = fail;
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    pub fn calls(&self, method: &str) -> Vec<Vec<Value>> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl PubSubChannel for MockChannel {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.refuse_connect {
            return Err(TransportError::Unavailable("connection refused".into()));
        }
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.closes += 1;
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let mut state = self.state.lock();
        state.calls.push((method.to_string(), params.clone()));
        if !state.connected {
            return Err(TransportError::NotConnected);
        }

        match method {
            methods::ACCOUNT_SUBSCRIBE | methods::PROGRAM_SUBSCRIBE => {
                let target = params.first().and_then(Value::as_str).unwrap_or_default();
                if state.failing_targets.contains(target) {
                    return Err(TransportError::Internal("subscribe rejected".into()));
                }
                let id = FIRST_REMOTE_ID + state.issued;
                state.issued += 1;
                Ok(json!(id))
            }
            methods::ACCOUNT_UNSUBSCRIBE | methods::PROGRAM_UNSUBSCRIBE => {
                if state.fail_unsubscribe {
                    return Err(TransportError::Internal("unsubscribe rejected".into()));
                }
                Ok(json!(true))
            }
            other => Err(TransportError::Internal(format!("unexpected call {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn hash(n: u8) -> Blockhash {
    Blockhash::new([n; 32])
}

pub fn blockhash_reply(blockhash: Blockhash) -> Reply {
    Reply::Result(json!([blockhash.to_string(), {"lamportsPerSignature": 0}]))
}

pub fn status(text: &str) -> Reply {
    Reply::Result(json!(text))
}

pub fn keypair(seed: u8) -> KeyPair {
    KeyPair::from_seed(&[seed; 32])
}

/// A one-instruction transfer from `payer` to `to`.
pub fn transfer(payer: &KeyPair, to: Identity, amount: u64) -> Transaction {
    let mut tx = Transaction::new();
    tx.add(Instruction::new(
        Identity::default(),
        vec![AccountRef::new(payer.identity(), true), AccountRef::new(to, false)],
        amount.to_le_bytes().to_vec(),
    ));
    tx
}

pub fn account_info(balance: u64) -> AccountInfo {
    AccountInfo {
        executable: false,
        owner: Identity::default(),
        balance,
        data: vec![1, 2, 3],
    }
}

pub fn notification(method: &str, remote_id: u64, result: Value) -> ChannelEvent {
    ChannelEvent::Notification {
        method: method.to_string(),
        params: json!({"result": result, "subscription": remote_id}),
    }
}
