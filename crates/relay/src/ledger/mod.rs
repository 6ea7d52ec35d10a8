//! Ledger clients: the only components that talk to either ledger.
//!
//! [LedgerClient] holds what both ledgers share (JSON-RPC transport, the relay's signer,
//! the writer queue, log subscriptions). [registry::RegistryClient] and
//! [automation::AutomationClient] bind it to each contract's function and event surface and
//! implement the [RegistryLedger] / [AutomationLedger] seams the engine is generic over.

pub mod automation;
pub mod registry;

use crate::config::{ClientSettings, LedgerConfig};
use crate::cursor::Cursor;
use crate::error::LedgerError;
use crate::events::{ObservedEvent, Origin};
use crate::rpc::{is_already_known, BlockTag, CallRequest, RpcClient};
use crate::signer::{transaction_hash, LegacyTx, Signer};
use crate::subscription::{LogDecoder, LogSubscription};
use crate::types::{ContactInfo, DeathDeclarationStatus, GracePeriodInfo, OwnerMirror, OwnerRecord, Receipt};
use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolCall;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// Used when gas estimation fails for a reason other than a revert.
const FALLBACK_GAS_LIMIT: u64 = 500_000;

/// Stream of decoded events (or stream errors) from one ledger.
pub type EventStream = mpsc::Receiver<Result<ObservedEvent, LedgerError>>;

/// Common surface of both ledgers.
pub trait Ledger: Send + Sync + 'static {
    fn origin(&self) -> Origin;

    /// Address of the relay's own signing identity on this ledger.
    fn signer_address(&self) -> Address;

    fn block_number(&self) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// Open the event subscription. The task ends when `shutdown` flips to true.
    fn subscribe(&self, shutdown: watch::Receiver<bool>) -> (EventStream, JoinHandle<()>);
}

/// Registry ledger reads used by the engine and the control surface.
pub trait RegistryLedger: Ledger {
    /// `None` when the owner never registered.
    fn owner_state(
        &self,
        owner: Address,
    ) -> impl Future<Output = Result<Option<OwnerRecord>, LedgerError>> + Send;

    fn death_declaration_status(
        &self,
        owner: Address,
    ) -> impl Future<Output = Result<DeathDeclarationStatus, LedgerError>> + Send;

    /// Every contact of `owner` with verification and voting state.
    fn contacts(
        &self,
        owner: Address,
    ) -> impl Future<Output = Result<Vec<ContactInfo>, LedgerError>> + Send;
}

/// Automation ledger reads and the three writes the relay performs.
pub trait AutomationLedger: Ledger {
    fn owner_data(&self, owner: Address) -> impl Future<Output = Result<OwnerMirror, LedgerError>> + Send;

    fn grace_period_info(
        &self,
        owner: Address,
    ) -> impl Future<Output = Result<GracePeriodInfo, LedgerError>> + Send;

    /// Full overwrite of the owner mirror.
    fn update_owner_data(
        &self,
        owner: Address,
        grace_interval: U256,
        is_deceased: bool,
        exists: bool,
    ) -> impl Future<Output = Result<Receipt, LedgerError>> + Send;

    fn start_grace_period(&self, owner: Address) -> impl Future<Output = Result<Receipt, LedgerError>> + Send;

    fn record_ping(&self, owner: Address) -> impl Future<Output = Result<Receipt, LedgerError>> + Send;
}

/// Transport, identity and writer queue for one contract on one ledger.
pub struct LedgerClient {
    origin: Origin,
    rpc: Arc<RpcClient>,
    signer: Signer,
    contract: Address,
    ws_url: Option<String>,
    start_block: Option<u64>,
    settings: ClientSettings,
    chain_id: OnceCell<u64>,
    /// Held from nonce fetch to confirmation. tokio's Mutex is FIFO, so this is the
    /// single writer queue for this signing identity.
    writer: Mutex<()>,
    cursor: Arc<std::sync::Mutex<Option<Cursor>>>,
}

impl LedgerClient {
    pub fn new(
        origin: Origin,
        config: &LedgerConfig,
        settings: &ClientSettings,
    ) -> Result<Self, LedgerError> {
        Ok(Self {
            origin,
            rpc: Arc::new(RpcClient::new(config.http_url.clone(), settings.retry)?),
            signer: Signer::new(&config.signing_key)?,
            contract: config.contract_address,
            ws_url: config.ws_url.clone(),
            start_block: config.start_block,
            settings: settings.clone(),
            chain_id: OnceCell::new(),
            writer: Mutex::new(()),
            cursor: Arc::new(std::sync::Mutex::new(None)),
        })
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    pub async fn block_number(&self) -> Result<u64, LedgerError> {
        self.rpc.block_number().await
    }

    /// eth_call against the contract at the latest block.
    pub async fn call(&self, calldata: &[u8]) -> Result<Vec<u8>, LedgerError> {
        let req = CallRequest {
            from: None,
            to: self.contract,
            data: calldata,
        };
        self.rpc.call(&req, BlockTag::Latest).await
    }

    /// Encode `call`, run it as a view and decode its return values.
    pub async fn view<C>(&self, call: C) -> Result<C::Return, LedgerError>
    where
        C: SolCall + Send,
    {
        let data = self.call(&call.abi_encode()).await?;
        C::abi_decode_returns(&data, true)
            .map_err(|e| LedgerError::Decode(format!("{}: {}", C::SIGNATURE, e)))
    }

    /// Sign, send and wait for confirmation of a call to the contract.
    ///
    /// Submissions are serialized per client. A revert detected at gas estimation or in the
    /// receipt is [LedgerError::Reverted]; a transaction still unmined after
    /// `tx_confirm_timeout` is [LedgerError::Timeout] and is not resent.
    pub async fn submit_transaction(
        &self,
        label: &'static str,
        owner: Address,
        calldata: Vec<u8>,
    ) -> Result<Receipt, LedgerError> {
        let _queue = self.writer.lock().await;
        let from = self.signer.address();
        let chain_id = *self
            .chain_id
            .get_or_try_init(|| self.rpc.chain_id())
            .await?;
        let req = CallRequest {
            from: Some(from),
            to: self.contract,
            data: &calldata,
        };
        let gas_limit = match self.rpc.estimate_gas(&req).await {
            Ok(estimate) => estimate.saturating_add(estimate / 5),
            Err(e @ LedgerError::Reverted { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!(origin = %self.origin, call = label, reason = %e, "gas estimation failed, using fallback limit");
                FALLBACK_GAS_LIMIT
            }
        };
        let gas_price = self.rpc.gas_price().await?;
        let nonce = self.rpc.transaction_count(from).await?;
        let raw = self.signer.sign_legacy(&LegacyTx {
            nonce,
            gas_price,
            gas_limit,
            to: self.contract,
            data: calldata.clone(),
            chain_id,
        })?;
        let tx_hash = transaction_hash(&raw);
        self.send_raw(&raw, tx_hash).await?;
        tracing::debug!(origin = %self.origin, call = label, %owner, %tx_hash, nonce, "transaction sent");

        let receipt = self.wait_for_receipt(tx_hash).await?;
        if !receipt.success {
            let reason = self.revert_reason(&req, receipt.block_number).await;
            tracing::warn!(origin = %self.origin, call = label, %owner, %tx_hash, block = receipt.block_number, %reason, "transaction reverted");
            return Err(LedgerError::Reverted { reason });
        }
        tracing::info!(
            origin = %self.origin,
            call = label,
            %owner,
            %tx_hash,
            block = receipt.block_number,
            gas_used = receipt.gas_used,
            "transaction confirmed"
        );
        Ok(Receipt {
            tx_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        })
    }

    /// Resending identical signed bytes is safe (same nonce, same hash), so transport
    /// failures are retried here; "already known" means an earlier attempt got through.
    async fn send_raw(&self, raw: &[u8], tx_hash: B256) -> Result<(), LedgerError> {
        let mut attempt = 0;
        loop {
            match self.rpc.send_raw_transaction(raw).await {
                Ok(reported) => {
                    if reported != tx_hash {
                        tracing::warn!(origin = %self.origin, %reported, expected = %tx_hash, "node reported unexpected tx hash");
                    }
                    return Ok(());
                }
                Err(e) if is_already_known(&e) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.settings.retry.max_retries => {
                    attempt += 1;
                    tracing::debug!(origin = %self.origin, %tx_hash, attempt, reason = %e, "resending raw transaction");
                    sleep(self.settings.retry.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<crate::rpc::RawReceipt, LedgerError> {
        let started = Instant::now();
        loop {
            match self.rpc.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(origin = %self.origin, %tx_hash, reason = %e, "receipt poll failed");
                }
            }
            let waited = started.elapsed();
            if waited >= self.settings.tx_confirm_timeout {
                return Err(LedgerError::Timeout { tx_hash, waited });
            }
            sleep(self.settings.receipt_poll_interval).await;
        }
    }

    /// Replay the call just before the inclusion block to recover the revert reason.
    async fn revert_reason(&self, req: &CallRequest<'_>, block_number: u64) -> String {
        match self
            .rpc
            .call(req, BlockTag::Number(block_number.saturating_sub(1)))
            .await
        {
            Err(LedgerError::Reverted { reason }) => reason,
            Err(e) => format!("reverted (reason unavailable: {})", e),
            Ok(_) => "reverted without reason".to_string(),
        }
    }

    /// Spawn the log subscription for this contract.
    pub fn subscribe(
        &self,
        topics: Vec<B256>,
        decode: LogDecoder,
        shutdown: watch::Receiver<bool>,
    ) -> (EventStream, JoinHandle<()>) {
        LogSubscription {
            origin: self.origin,
            rpc: Arc::clone(&self.rpc),
            ws_url: self.ws_url.clone(),
            contract: self.contract,
            topics,
            decode,
            getlogs_max_range: self.settings.getlogs_max_range,
            poll_interval: self.settings.event_poll_interval,
            reconnection: self.settings.reconnection.clone(),
            channel_capacity: self.settings.event_channel_capacity,
            start_block: self.start_block,
            cursor: Arc::clone(&self.cursor),
        }
        .spawn(shutdown)
    }
}
