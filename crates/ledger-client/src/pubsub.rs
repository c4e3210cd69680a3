//! Push subscriptions over one multiplexed streaming channel.
//!
//! Watches live locally in a table keyed by a locally allocated id. Each
//! entry remembers the id the node assigned to it (`remote_id`), which is
//! `None` until the subscribe call succeeds and is reset for every entry when
//! the channel drops. Reconciliation drives the channel towards the table:
//! close it when nothing is watched, (re)connect it otherwise, and subscribe
//! every entry that has no remote id. Reconciliation passes never overlap.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ledger_codec::Identity;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ClientError, TransportError};
use crate::rpc::methods;
use crate::types::{AccountInfo, KeyedAccountInfo};

/// Locally allocated watch id.
pub type SubscriptionId = u64;

pub type AccountChangeCallback = Arc<dyn Fn(AccountInfo) + Send + Sync>;
pub type ProgramAccountChangeCallback = Arc<dyn Fn(KeyedAccountInfo) + Send + Sync>;

/// A streaming connection to a node that can carry many subscriptions.
///
/// `connect` resolves once the channel is usable. Inbound traffic that is
/// not a reply to `call` (notifications, disconnects) is delivered to the
/// manager as [`ChannelEvent`]s.
#[async_trait]
pub trait PubSubChannel: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn close(&self);

    fn is_connected(&self) -> bool;

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError>;
}

#[async_trait]
impl<C: PubSubChannel + ?Sized> PubSubChannel for Arc<C> {
    async fn connect(&self) -> Result<(), TransportError> {
        (**self).connect().await
    }

    async fn close(&self) {
        (**self).close().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        (**self).call(method, params).await
    }
}

/// Lifecycle and inbound traffic of a [`PubSubChannel`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Opened,
    /// The connection dropped, expectedly or not.
    Closed,
    Error(String),
    Notification { method: String, params: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchKind {
    Account,
    Program,
}

impl WatchKind {
    fn subscribe_method(self) -> &'static str {
        match self {
            Self::Account => methods::ACCOUNT_SUBSCRIBE,
            Self::Program => methods::PROGRAM_SUBSCRIBE,
        }
    }

    fn unsubscribe_method(self) -> &'static str {
        match self {
            Self::Account => methods::ACCOUNT_UNSUBSCRIBE,
            Self::Program => methods::PROGRAM_UNSUBSCRIBE,
        }
    }

    fn from_notification(method: &str) -> Option<Self> {
        match method {
            methods::ACCOUNT_NOTIFICATION => Some(Self::Account),
            methods::PROGRAM_NOTIFICATION => Some(Self::Program),
            _ => None,
        }
    }
}

#[derive(Clone)]
enum Watch {
    Account(AccountChangeCallback),
    Program(ProgramAccountChangeCallback),
}

impl Watch {
    fn kind(&self) -> WatchKind {
        match self {
            Self::Account(_) => WatchKind::Account,
            Self::Program(_) => WatchKind::Program,
        }
    }
}

struct SubscriptionEntry {
    target: Identity,
    watch: Watch,
    remote_id: Option<u64>,
}

/// Local subscription table bound to one channel.
pub struct SubscriptionManager<C> {
    channel: C,
    entries: Mutex<BTreeMap<SubscriptionId, SubscriptionEntry>>,
    next_id: AtomicU64,
    reconcile_gate: tokio::sync::Mutex<()>,
}

impl<C: PubSubChannel> SubscriptionManager<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
            reconcile_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// The id the node assigned to a watch, if it is currently subscribed.
    pub fn remote_subscription_id(&self, id: SubscriptionId) -> Option<u64> {
        self.entries.lock().get(&id).and_then(|entry| entry.remote_id)
    }

    pub async fn watch_account(
        &self,
        account: Identity,
        callback: AccountChangeCallback,
    ) -> SubscriptionId {
        self.add_watch(account, Watch::Account(callback)).await
    }

    pub async fn watch_program_accounts(
        &self,
        program_id: Identity,
        callback: ProgramAccountChangeCallback,
    ) -> SubscriptionId {
        self.add_watch(program_id, Watch::Program(callback)).await
    }

    pub async fn unwatch_account(&self, id: SubscriptionId) -> Result<(), ClientError> {
        self.remove_watch(id, WatchKind::Account).await
    }

    pub async fn unwatch_program_accounts(&self, id: SubscriptionId) -> Result<(), ClientError> {
        self.remove_watch(id, WatchKind::Program).await
    }

    async fn add_watch(&self, target: Identity, watch: Watch) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(
            id,
            SubscriptionEntry {
                target,
                watch,
                remote_id: None,
            },
        );
        debug!(subscription = id, account = %target, "watch added");
        self.reconcile().await;
        id
    }

    async fn remove_watch(&self, id: SubscriptionId, kind: WatchKind) -> Result<(), ClientError> {
        let removed = {
            let mut entries = self.entries.lock();
            let matches = entries.get(&id).is_some_and(|entry| entry.watch.kind() == kind);
            if matches {
                entries.remove(&id)
            } else {
                None
            }
        };
        let entry = removed.ok_or(ClientError::UnknownSubscription(id))?;
        debug!(subscription = id, account = %entry.target, "watch removed");

        if let Some(remote_id) = entry.remote_id {
            self.unsubscribe_remote(kind, remote_id).await;
        }
        self.reconcile().await;
        Ok(())
    }

    /// Bring the channel in line with the subscription table.
    pub async fn reconcile(&self) {
        let _gate = self.reconcile_gate.lock().await;

        let empty = self.entries.lock().is_empty();
        if empty {
            if self.channel.is_connected() {
                info!("no watches left, closing subscription channel");
                self.channel.close().await;
            }
            return;
        }

        if !self.channel.is_connected() {
            self.forget_remote_ids();
            info!("connecting subscription channel");
            if let Err(e) = self.channel.connect().await {
                warn!(error = %e, "subscription channel connect failed");
                return;
            }
        }

        let pending: Vec<(SubscriptionId, WatchKind, Identity)> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.remote_id.is_none())
            .map(|(id, entry)| (*id, entry.watch.kind(), entry.target))
            .collect();

        for (id, kind, target) in pending {
            let params = vec![json!(target.to_base58())];
            match self.channel.call(kind.subscribe_method(), params).await {
                Ok(value) => match value.as_u64() {
                    Some(remote_id) => self.bind(id, kind, remote_id).await,
                    None => warn!(subscription = id, reply = %value, "subscribe returned no id"),
                },
                Err(e) => warn!(subscription = id, error = %e, "subscribe failed"),
            }
        }
    }

    /// Store a remote id, or release it if the watch went away meanwhile.
    async fn bind(&self, id: SubscriptionId, kind: WatchKind, remote_id: u64) {
        let orphaned = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&id) {
                Some(entry) if entry.remote_id.is_none() => {
                    entry.remote_id = Some(remote_id);
                    false
                }
                _ => true,
            }
        };
        if orphaned {
            debug!(subscription = id, remote_id, "watch removed while subscribing");
            self.unsubscribe_remote(kind, remote_id).await;
        } else {
            debug!(subscription = id, remote_id, "subscribed");
        }
    }

    async fn unsubscribe_remote(&self, kind: WatchKind, remote_id: u64) {
        if !self.channel.is_connected() {
            return;
        }
        if let Err(e) = self
            .channel
            .call(kind.unsubscribe_method(), vec![json!(remote_id)])
            .await
        {
            warn!(remote_id, error = %e, "unsubscribe failed");
        }
    }

    fn forget_remote_ids(&self) {
        for entry in self.entries.lock().values_mut() {
            entry.remote_id = None;
        }
    }

    pub async fn handle_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => {
                debug!("subscription channel opened");
                self.reconcile().await;
            }
            ChannelEvent::Closed => {
                // A late close can arrive after a reconnect; reconcile only
                // drops remote ids while the channel is actually down.
                info!("subscription channel closed, resubscribing");
                self.reconcile().await;
            }
            ChannelEvent::Error(message) => {
                warn!(error = %message, "subscription channel error");
            }
            ChannelEvent::Notification { method, params } => self.dispatch(&method, &params),
        }
    }

    /// Route a notification to the watch whose remote id matches its
    /// subscription tag.
    fn dispatch(&self, method: &str, params: &Value) {
        let Some(kind) = WatchKind::from_notification(method) else {
            debug!(method, "ignoring unknown notification");
            return;
        };
        let Some(remote_id) = params.get("subscription").and_then(Value::as_u64) else {
            warn!(method, "notification without subscription tag");
            return;
        };
        let result = params.get("result").cloned().unwrap_or(Value::Null);

        let watch = self
            .entries
            .lock()
            .values()
            .find(|entry| entry.remote_id == Some(remote_id) && entry.watch.kind() == kind)
            .map(|entry| entry.watch.clone());

        match watch {
            Some(Watch::Account(callback)) => {
                if let Some(info) = decode_notification::<AccountInfo>(method, result) {
                    callback(info);
                }
            }
            Some(Watch::Program(callback)) => {
                if let Some(keyed) = decode_notification::<KeyedAccountInfo>(method, result) {
                    callback(keyed);
                }
            }
            None => debug!(method, remote_id, "notification for unknown subscription"),
        }
    }
}

impl<C: PubSubChannel + 'static> SubscriptionManager<C> {
    /// Feed channel events to the manager until the sender side is dropped.
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<ChannelEvent>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                manager.handle_event(event).await;
            }
            debug!("subscription event stream ended");
        })
    }
}

fn decode_notification<T: DeserializeOwned>(method: &str, result: Value) -> Option<T> {
    match serde_json::from_value(result) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(method, error = %e, "undecodable notification payload");
            None
        }
    }
}
