//! The ledger client: request/response calls, submission and confirmation,
//! and the push-subscription facade.

use std::future::Future;
use std::sync::Arc;

use ledger_codec::{Blockhash, CodecError, Identity, KeyPair, Transaction};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use crate::blockhash::BlockhashCache;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::pubsub::{ChannelEvent, PubSubChannel, SubscriptionId, SubscriptionManager};
use crate::rpc::{methods, RpcRequest, RpcTransport};
use crate::types::{strip_context, AccountInfo, KeyedAccountInfo, RecentBlockhash, SignatureStatus};

/// What a send-and-confirm round puts on the wire.
enum Payload<'a, 'k> {
    /// Pre-serialized bytes, resent unchanged.
    Raw(&'a [u8]),
    /// A transaction re-signed against the freshest blockhash on every send.
    Signed {
        transaction: &'a mut Transaction,
        signers: &'a [&'k KeyPair],
    },
}

/// Client for one ledger node.
///
/// `T` carries request/response calls, `C` the streaming channel used for
/// account-change subscriptions.
pub struct LedgerClient<T, C> {
    transport: T,
    config: ClientConfig,
    blockhash_cache: Mutex<BlockhashCache>,
    subscriptions: Arc<SubscriptionManager<C>>,
}

impl<T: RpcTransport, C: PubSubChannel> LedgerClient<T, C> {
    pub fn new(transport: T, channel: C) -> Self {
        Self::with_config(transport, channel, ClientConfig::default())
    }

    pub fn with_config(transport: T, channel: C, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            blockhash_cache: Mutex::new(BlockhashCache::default()),
            subscriptions: Arc::new(SubscriptionManager::new(channel)),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager<C>> {
        &self.subscriptions
    }

    // -----------------------------------------------------------------------
    // Request/response calls
    // -----------------------------------------------------------------------

    async fn call_value(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        let request = RpcRequest::new(method, params);
        debug!(method, id = %request.id, "rpc request");
        let body = self.transport.request(&request).await?;
        request.decode_response(&body)
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<R, ClientError> {
        let result = strip_context(self.call_value(method, params).await?);
        serde_json::from_value(result).map_err(|e| {
            ClientError::ProtocolViolation(format!("{method}: unexpected result shape: {e}"))
        })
    }

    pub async fn get_balance(&self, account: &Identity) -> Result<u64, ClientError> {
        self.call(methods::GET_BALANCE, vec![json!(account.to_base58())])
            .await
    }

    /// `None` if the account does not exist.
    pub async fn get_account_info(
        &self,
        account: &Identity,
    ) -> Result<Option<AccountInfo>, ClientError> {
        self.call(methods::GET_ACCOUNT_INFO, vec![json!(account.to_base58())])
            .await
    }

    pub async fn get_recent_blockhash(&self) -> Result<Blockhash, ClientError> {
        let recent: RecentBlockhash = self.call(methods::GET_RECENT_BLOCKHASH, vec![]).await?;
        recent.blockhash()
    }

    pub async fn get_signature_status(
        &self,
        signature: &str,
    ) -> Result<SignatureStatus, ClientError> {
        let result = self
            .call_value(methods::GET_SIGNATURE_STATUS, vec![json!(signature)])
            .await?;
        SignatureStatus::from_rpc(&strip_context(result))
    }

    pub async fn confirm_transaction(&self, signature: &str) -> Result<bool, ClientError> {
        Ok(self.get_signature_status(signature).await? == SignatureStatus::Confirmed)
    }

    pub async fn get_transaction_count(&self) -> Result<u64, ClientError> {
        self.call(methods::GET_TRANSACTION_COUNT, vec![]).await
    }

    /// Ask the node to credit `amount` to `to`. Returns the signature of the
    /// funding transaction.
    pub async fn request_airdrop(&self, to: &Identity, amount: u64) -> Result<String, ClientError> {
        self.call(methods::REQUEST_AIRDROP, vec![json!(to.to_base58()), json!(amount)])
            .await
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Send serialized transaction bytes. Returns the signature the node
    /// reports for it.
    pub async fn send_raw_transaction(&self, wire: &[u8]) -> Result<String, ClientError> {
        let encoded = bs58::encode(wire).into_string();
        let signature: String = self
            .call(methods::SEND_TRANSACTION, vec![json!(encoded)])
            .await?;
        debug!(%signature, bytes = wire.len(), "transaction sent");
        Ok(signature)
    }

    /// Sign `transaction` against a current blockhash and send it.
    ///
    /// Any blockhash already on the transaction is replaced.
    pub async fn send_transaction(
        &self,
        transaction: &mut Transaction,
        signers: &[&KeyPair],
    ) -> Result<String, ClientError> {
        let wire = self.sign_with_fresh_blockhash(transaction, signers).await?;
        self.send_raw_transaction(&wire).await
    }

    /// Assign the cached blockhash and sign, refreshing the cache when it is
    /// empty or stale, or when this exact signature was already sent under
    /// it. Concurrent submitters queue on the cache lock.
    async fn sign_with_fresh_blockhash(
        &self,
        transaction: &mut Transaction,
        signers: &[&KeyPair],
    ) -> Result<Vec<u8>, ClientError> {
        let mut cache = self.blockhash_cache.lock().await;
        let started = Instant::now();

        loop {
            if let Some(blockhash) = cache.fresh(self.config.blockhash_max_age) {
                transaction.set_recent_blockhash(blockhash);
                transaction.sign(signers)?;
                let signature = transaction
                    .signature()
                    .ok_or(CodecError::UnsignedTransaction)?;
                let signature = bs58::encode(signature).into_string();
                let wire = transaction.serialize()?;

                if cache.record_signature(signature.clone()) {
                    return Ok(wire);
                }
                debug!(%signature, %blockhash, "signature already sent under cached blockhash");
            }

            let mut attempts = 0;
            loop {
                let latest = self.get_recent_blockhash().await?;
                attempts += 1;
                if cache.observe(latest) {
                    debug!(blockhash = %latest, attempts, "blockhash refreshed");
                    break;
                }
                if attempts >= self.config.blockhash_refresh_attempts {
                    return Err(ClientError::BlockhashUnavailable {
                        attempts,
                        elapsed: started.elapsed(),
                    });
                }
                sleep(self.config.poll_interval()).await;
            }
        }
    }

    /// Send and wait until the node confirms the transaction, resending on
    /// account-lock contention.
    pub async fn send_and_confirm_transaction(
        &self,
        transaction: &mut Transaction,
        signers: &[&KeyPair],
    ) -> Result<String, ClientError> {
        self.with_deadline(self.confirm_loop(Payload::Signed {
            transaction,
            signers,
        }))
        .await
    }

    /// Like [`send_and_confirm_transaction`](Self::send_and_confirm_transaction)
    /// for bytes that are already signed; every resend is byte-identical.
    pub async fn send_and_confirm_raw_transaction(
        &self,
        wire: &[u8],
    ) -> Result<String, ClientError> {
        self.with_deadline(self.confirm_loop(Payload::Raw(wire)))
            .await
    }

    async fn with_deadline<R>(
        &self,
        operation: impl Future<Output = Result<R, ClientError>>,
    ) -> Result<R, ClientError> {
        match self.config.confirm_timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| ClientError::TimedOut(limit))?,
            None => operation.await,
        }
    }

    async fn confirm_loop(&self, mut payload: Payload<'_, '_>) -> Result<String, ClientError> {
        let started = Instant::now();
        let mut last_status = None;

        for attempt in 1..=self.config.send_attempts {
            let signature = match &mut payload {
                Payload::Raw(wire) => self.send_raw_transaction(wire).await?,
                Payload::Signed {
                    transaction,
                    signers,
                } => self.send_transaction(transaction, signers).await?,
            };

            let status = self.poll_status(&signature).await?;
            match &status {
                SignatureStatus::Confirmed => {
                    info!(%signature, attempt, "transaction confirmed");
                    return Ok(signature);
                }
                SignatureStatus::Failed(reason) => {
                    warn!(%signature, %reason, "transaction failed");
                    return Err(ClientError::TransactionFailed {
                        signature,
                        reason: reason.clone(),
                    });
                }
                SignatureStatus::AccountInUse => {
                    let jitter_ms =
                        rand::thread_rng().gen_range(0..=self.config.account_in_use_jitter_ms);
                    warn!(%signature, attempt, jitter_ms, "account in use, resending");
                    sleep(Duration::from_millis(jitter_ms)).await;
                }
                SignatureStatus::NotFound => {
                    debug!(%signature, attempt, "transaction not yet seen, resending");
                }
            }
            last_status = Some(status);
        }

        Err(ClientError::ConfirmationTimeout {
            elapsed: started.elapsed(),
            last_status,
        })
    }

    /// Poll until a terminal status or the poll budget runs out; returns the
    /// last status seen. Transient transport faults count as "not found".
    async fn poll_status(&self, signature: &str) -> Result<SignatureStatus, ClientError> {
        let mut status = SignatureStatus::NotFound;
        for poll in 1..=self.config.status_poll_attempts {
            status = match self.get_signature_status(signature).await {
                Ok(status) => status,
                Err(e) if e.is_retryable() => {
                    warn!(signature, error = %e, "status poll failed");
                    SignatureStatus::NotFound
                }
                Err(e) => return Err(e),
            };
            if status.is_terminal() {
                break;
            }
            if poll < self.config.status_poll_attempts {
                sleep(self.config.poll_interval()).await;
            }
        }
        Ok(status)
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Invoke `callback` whenever `account` changes.
    pub async fn on_account_change<F>(&self, account: Identity, callback: F) -> SubscriptionId
    where
        F: Fn(AccountInfo) + Send + Sync + 'static,
    {
        self.subscriptions
            .watch_account(account, Arc::new(callback))
            .await
    }

    pub async fn remove_account_change_listener(
        &self,
        id: SubscriptionId,
    ) -> Result<(), ClientError> {
        self.subscriptions.unwatch_account(id).await
    }

    /// Invoke `callback` whenever any account owned by `program_id` changes.
    pub async fn on_program_account_change<F>(
        &self,
        program_id: Identity,
        callback: F,
    ) -> SubscriptionId
    where
        F: Fn(KeyedAccountInfo) + Send + Sync + 'static,
    {
        self.subscriptions
            .watch_program_accounts(program_id, Arc::new(callback))
            .await
    }

    pub async fn remove_program_account_change_listener(
        &self,
        id: SubscriptionId,
    ) -> Result<(), ClientError> {
        self.subscriptions.unwatch_program_accounts(id).await
    }

    pub fn remote_subscription_id(&self, id: SubscriptionId) -> Option<u64> {
        self.subscriptions.remote_subscription_id(id)
    }

    pub async fn handle_channel_event(&self, event: ChannelEvent) {
        self.subscriptions.handle_event(event).await
    }
}

impl<T: RpcTransport, C: PubSubChannel + 'static> LedgerClient<T, C> {
    /// Process channel events on a background task.
    pub fn spawn_event_loop(&self, events: mpsc::Receiver<ChannelEvent>) -> JoinHandle<()> {
        self.subscriptions.spawn_event_loop(events)
    }
}
