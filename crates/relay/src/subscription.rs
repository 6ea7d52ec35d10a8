//! Log subscription for one contract: backfill over HTTP, then follow live logs over
//! WebSocket (or poll eth_getLogs when no WebSocket URL is configured).
//!
//! Decoded events go into a bounded channel consumed by the router. A dropped connection is
//! pushed into the same channel as [LedgerError::Stream] before resubscribing with
//! exponential backoff; the in-memory [Cursor] makes the next attempt backfill the gap.

use crate::abi::{parse_log, RawLog};
use crate::config::ReconnectionConfig;
use crate::cursor::Cursor;
use crate::error::LedgerError;
use crate::events::{DomainEvent, ObservedEvent, Origin};
use crate::rpc::RpcClient;
use alloy::primitives::{Address, B256};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Decoder from a raw log to a domain event; `Ok(None)` for logs of other kinds.
pub type LogDecoder = fn(&RawLog) -> anyhow::Result<Option<DomainEvent>>;

/// Items delivered to the router.
pub type StreamItem = Result<ObservedEvent, LedgerError>;

/// Subscription parameters for one contract.
#[derive(Clone)]
pub struct LogSubscription {
    pub origin: Origin,
    pub rpc: Arc<RpcClient>,
    pub ws_url: Option<String>,
    pub contract: Address,
    pub topics: Vec<B256>,
    pub decode: LogDecoder,
    pub getlogs_max_range: u64,
    pub poll_interval: Duration,
    pub reconnection: ReconnectionConfig,
    pub channel_capacity: usize,
    /// First block to deliver when the cursor is still unset; `None` means the current tip.
    pub start_block: Option<u64>,
    /// Shared with the owning client so resubscriptions resume where the last one stopped.
    pub cursor: Arc<Mutex<Option<Cursor>>>,
}

impl LogSubscription {
    /// Spawn the subscription task. It runs until `shutdown` flips to true (or its sender is
    /// dropped), or until the receiving side of the channel is dropped.
    pub fn spawn(
        self,
        mut shutdown: watch::Receiver<bool>,
    ) -> (mpsc::Receiver<StreamItem>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.channel_capacity.max(1));
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = self.run(&tx) => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    tracing::debug!(origin = %self.origin, "subscription stopped");
                }
            }
        });
        (rx, handle)
    }

    async fn run(&self, tx: &mpsc::Sender<StreamItem>) {
        let initial = Duration::from_secs(self.reconnection.initial_backoff_secs);
        let max = Duration::from_secs(self.reconnection.max_backoff_secs);
        let mut backoff = initial;
        loop {
            let mut established = false;
            let err = match self.run_once(tx, &mut established).await {
                Ok(()) => LedgerError::Stream("subscription closed by node".into()),
                Err(e) => e,
            };
            if tx.is_closed() {
                return;
            }
            if established {
                backoff = initial;
            }
            tracing::warn!(origin = %self.origin, reason = %err, backoff = ?backoff, "subscription dropped, resubscribing");
            let stream_err = match err {
                LedgerError::Stream(_) => err,
                other => LedgerError::Stream(other.to_string()),
            };
            if tx.send(Err(stream_err)).await.is_err() {
                return;
            }
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
            sleep(backoff + jitter).await;
            backoff = std::cmp::min(backoff * 2, max);
        }
    }

    fn cursor(&self) -> Option<Cursor> {
        *self.cursor.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn already_delivered(&self, log: &RawLog) -> bool {
        self.cursor()
            .is_some_and(|c| c.is_delivered(log.block_number, log.log_index))
    }

    fn mark_delivered(&self, log: &RawLog) {
        let mut guard = self.cursor.lock().unwrap_or_else(|p| p.into_inner());
        guard
            .get_or_insert_with(Cursor::default)
            .mark_delivered(log.block_number, log.log_index);
    }

    fn set_cursor(&self, block: u64) {
        let mut guard = self.cursor.lock().unwrap_or_else(|p| p.into_inner());
        match guard.as_mut() {
            Some(c) => c.advance_to(block),
            None => *guard = Some(Cursor::new(block)),
        }
    }

    /// Initialise the cursor on first use: configured start block, or the current tip.
    async fn ensure_cursor(&self) -> Result<Cursor, LedgerError> {
        if let Some(c) = self.cursor() {
            return Ok(c);
        }
        let c = match self.start_block {
            Some(start) => Cursor::starting_at(start),
            None => Cursor::new(self.rpc.block_number().await?),
        };
        let mut guard = self.cursor.lock().unwrap_or_else(|p| p.into_inner());
        Ok(*guard.get_or_insert(c))
    }

    async fn run_once(
        &self,
        tx: &mpsc::Sender<StreamItem>,
        established: &mut bool,
    ) -> Result<(), LedgerError> {
        self.ensure_cursor().await?;
        match &self.ws_url {
            Some(ws_url) => self.follow_ws(ws_url, tx, established).await,
            None => self.poll(tx, established).await,
        }
    }

    /// Backfill everything after the cursor up to the current tip. Returns the tip.
    async fn catch_up(&self, tx: &mpsc::Sender<StreamItem>) -> Result<u64, LedgerError> {
        let tip = self.rpc.block_number().await?;
        let from = self.ensure_cursor().await?.next_block();
        if from <= tip {
            self.backfill(from, tip, tx).await?;
        }
        self.set_cursor(tip);
        Ok(tip)
    }

    async fn poll(
        &self,
        tx: &mpsc::Sender<StreamItem>,
        established: &mut bool,
    ) -> Result<(), LedgerError> {
        loop {
            self.catch_up(tx).await?;
            *established = true;
            if tx.is_closed() {
                return Ok(());
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn follow_ws(
        &self,
        ws_url: &str,
        tx: &mpsc::Sender<StreamItem>,
        established: &mut bool,
    ) -> Result<(), LedgerError> {
        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| LedgerError::Stream(format!("WS connect: {}", e)))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let filter = build_logs_filter(&self.contract, Some(&self.topics), None, None);
        let needs_client_filter =
            match subscribe(&mut ws_sender, &mut ws_receiver, json!(["logs", filter])).await {
                Ok(_) => false,
                Err(SubscribeError::Unsupported(reason)) => {
                    tracing::warn!(origin = %self.origin, %reason, "RPC does not support logs filter, using client-side filter");
                    subscribe(&mut ws_sender, &mut ws_receiver, json!(["logs"]))
                        .await
                        .map_err(SubscribeError::into_ledger)?;
                    true
                }
                Err(e) => return Err(e.into_ledger()),
            };

        // Subscribe first, then backfill: live logs for blocks the backfill already covered
        // are dropped below, so nothing falls between the two.
        let backfilled_tip = self.catch_up(tx).await?;
        *established = true;
        tracing::info!(origin = %self.origin, from_block = backfilled_tip + 1, "following live logs");

        while let Some(msg) = ws_receiver.next().await {
            let text = match msg.map_err(|e| LedgerError::Stream(format!("ws: {}", e)))? {
                Message::Text(t) => t,
                Message::Close(_) => break,
                _ => continue,
            };
            let v: Value = serde_json::from_str(&text)
                .map_err(|e| LedgerError::Decode(format!("parse ws message: {}", e)))?;
            if v.get("method").and_then(|m| m.as_str()) != Some("eth_subscription") {
                continue;
            }
            let result = v
                .get("params")
                .and_then(|p| p.get("result"))
                .ok_or_else(|| LedgerError::Decode("no params.result".into()))?;
            let log = match parse_log(result) {
                Ok(log) => log,
                Err(e) => {
                    tracing::debug!(origin = %self.origin, reason = %e, "live log skipped");
                    continue;
                }
            };
            if needs_client_filter && !self.matches(&log) {
                continue;
            }
            if log.block_number <= backfilled_tip {
                continue;
            }
            self.deliver(log, tx).await?;
        }
        Ok(())
    }

    fn matches(&self, log: &RawLog) -> bool {
        log.address == self.contract
            && log.topic0().map(|t| self.topics.contains(&t)).unwrap_or(false)
    }

    async fn deliver(&self, log: RawLog, tx: &mpsc::Sender<StreamItem>) -> Result<(), LedgerError> {
        if log.removed {
            tracing::debug!(origin = %self.origin, block = log.block_number, tx_hash = %log.tx_hash, "removed log skipped");
            return Ok(());
        }
        if self.already_delivered(&log) {
            tracing::debug!(origin = %self.origin, block = log.block_number, log_index = log.log_index, "log already delivered, skipped");
            return Ok(());
        }
        let block_number = log.block_number;
        match (self.decode)(&log) {
            Ok(Some(event)) => {
                let observed = ObservedEvent {
                    origin: self.origin,
                    event,
                    block_number,
                    tx_hash: log.tx_hash,
                    log_index: log.log_index,
                };
                if tx.send(Ok(observed)).await.is_err() {
                    return Err(LedgerError::Stream("event receiver dropped".into()));
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(origin = %self.origin, block = block_number, tx_hash = %log.tx_hash, reason = %e, "log decode failed");
            }
        }
        // A block counts as complete only once a later one is seen; a reconnect mid-block
        // fetches that block again and skips the logs marked here.
        self.mark_delivered(&log);
        Ok(())
    }

    async fn backfill(
        &self,
        from_block: u64,
        to_block: u64,
        tx: &mpsc::Sender<StreamItem>,
    ) -> Result<(), LedgerError> {
        let mut from = from_block;
        while from <= to_block {
            let to = (from + self.getlogs_max_range - 1).min(to_block);
            let filter = build_logs_filter(&self.contract, Some(&self.topics), Some(from), Some(to));
            let raw = match self.rpc.get_logs(filter).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::debug!(origin = %self.origin, reason = %e, "eth_getLogs with topic filter failed, trying address-only");
                    let fallback = build_logs_filter(&self.contract, None, Some(from), Some(to));
                    self.rpc.get_logs(fallback).await?
                }
            };
            let mut logs: Vec<RawLog> = raw
                .iter()
                .filter_map(|log| {
                    parse_log(log)
                        .map_err(|e| tracing::debug!(%e, "backfill log skipped"))
                        .ok()
                })
                .filter(|log| self.matches(log))
                .collect();
            if !logs.is_empty() {
                tracing::debug!(origin = %self.origin, count = logs.len(), from, to, "backfill: matched logs");
            }
            logs.sort_by_key(|l| (l.block_number, l.log_index));
            for log in logs {
                self.deliver(log, tx).await?;
            }
            self.set_cursor(to);
            from = to + 1;
        }
        Ok(())
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn build_logs_filter(
    address: &Address,
    topics: Option<&[B256]>,
    from_block: Option<u64>,
    to_block: Option<u64>,
) -> Value {
    let mut filter = json!({
        "address": format!("0x{}", hex::encode(address)),
    });
    // Position 0 holds an OR-set of event signatures.
    if let Some(topics) = topics {
        let set: Vec<String> = topics
            .iter()
            .map(|t| format!("0x{}", hex::encode(t)))
            .collect();
        filter["topics"] = json!([set]);
    }
    if let Some(from) = from_block {
        filter["fromBlock"] = Value::String(format!("0x{:x}", from));
    }
    if let Some(to) = to_block {
        filter["toBlock"] = Value::String(format!("0x{:x}", to));
    }
    filter
}

enum SubscribeError {
    /// Node rejected the filter shape (e.g. Anvil and OR-set topics).
    Unsupported(String),
    Other(LedgerError),
}

impl SubscribeError {
    fn into_ledger(self) -> LedgerError {
        match self {
            SubscribeError::Unsupported(reason) => LedgerError::Stream(format!("subscribe error: {}", reason)),
            SubscribeError::Other(e) => e,
        }
    }
}

async fn subscribe<S, R>(ws_sender: &mut S, ws_receiver: &mut R, params: Value) -> Result<String, SubscribeError>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
    R: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let stream_err = |msg: String| SubscribeError::Other(LedgerError::Stream(msg));
    let sub_req = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_subscribe",
        "params": params
    });
    ws_sender
        .send(Message::Text(sub_req.to_string()))
        .await
        .map_err(|e| stream_err(format!("send subscribe: {}", e)))?;
    let text = match timeout(Duration::from_secs(10), ws_receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(_))) => return Err(stream_err("unexpected message".into())),
        Ok(Some(Err(e))) => return Err(stream_err(format!("ws: {}", e))),
        Ok(None) => return Err(stream_err("ws closed".into())),
        Err(_) => return Err(stream_err("subscribe timeout".into())),
    };
    let v: Value = serde_json::from_str(&text)
        .map_err(|e| SubscribeError::Other(LedgerError::Decode(format!("parse sub response: {}", e))))?;
    if let Some(err) = v.get("error") {
        let message = err.get("message").and_then(|m| m.as_str()).unwrap_or("");
        if message.contains("data did not match") || message.contains("variant") {
            return Err(SubscribeError::Unsupported(message.to_string()));
        }
        return Err(stream_err(format!("subscribe error: {}", err)));
    }
    v["result"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| stream_err("no subscription id".into()))
}
