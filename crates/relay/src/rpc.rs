//! Minimal Ethereum JSON-RPC client over HTTP.

use crate::abi::{decode_revert_reason, parse_b256, parse_hex_bytes, parse_hex_u64};
use crate::config::RetryConfig;
use crate::error::LedgerError;
use alloy::primitives::{Address, B256};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// Transaction receipt fields the relay cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    pub success: bool,
}

/// Block tag for eth_call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl BlockTag {
    fn to_param(self) -> Value {
        match self {
            BlockTag::Latest => Value::String("latest".into()),
            BlockTag::Number(n) => Value::String(format!("0x{:x}", n)),
        }
    }
}

/// Call request (eth_call / eth_estimateGas params).
#[derive(Debug, Clone)]
pub struct CallRequest<'a> {
    pub from: Option<Address>,
    pub to: Address,
    pub data: &'a [u8],
}

impl CallRequest<'_> {
    fn to_param(&self) -> Value {
        let mut v = json!({
            "to": format!("0x{}", hex::encode(self.to)),
            "data": format!("0x{}", hex::encode(self.data)),
        });
        if let Some(from) = self.from {
            v["from"] = Value::String(format!("0x{}", hex::encode(from)));
        }
        v
    }
}

/// JSON-RPC client bound to one HTTP endpoint.
#[derive(Debug)]
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    retry: RetryConfig,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, retry: RetryConfig) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            retry,
            next_id: AtomicU64::new(1),
        })
    }

    /// One request, no retry. JSON-RPC errors mentioning a revert map to
    /// [LedgerError::Reverted]; all other failures are [LedgerError::Rpc].
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let json: Value = resp.json().await?;
        if let Some(err) = json.get("error") {
            return Err(classify_rpc_error(err));
        }
        json.get("result")
            .cloned()
            .ok_or_else(|| LedgerError::Decode("Missing result".into()))
    }

    /// [Self::request] with up to `max_retries` extra attempts on retryable failures.
    pub async fn request_with_retry(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, LedgerError> {
        let mut attempt = 0;
        loop {
            match self.request(method, params.clone()).await {
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    tracing::debug!(method, attempt, reason = %e, "retrying RPC request");
                    sleep(self.retry.delay).await;
                }
                other => return other,
            }
        }
    }

    pub async fn block_number(&self) -> Result<u64, LedgerError> {
        let result = self.request_with_retry("eth_blockNumber", json!([])).await?;
        hex_u64(&result, "blockNumber")
    }

    pub async fn chain_id(&self) -> Result<u64, LedgerError> {
        let result = self.request_with_retry("eth_chainId", json!([])).await?;
        hex_u64(&result, "chainId")
    }

    pub async fn gas_price(&self) -> Result<u64, LedgerError> {
        let result = self.request_with_retry("eth_gasPrice", json!([])).await?;
        hex_u64(&result, "gasPrice")
    }

    /// Pending nonce of `address`.
    pub async fn transaction_count(&self, address: Address) -> Result<u64, LedgerError> {
        let result = self
            .request_with_retry(
                "eth_getTransactionCount",
                json!([format!("0x{}", hex::encode(address)), "pending"]),
            )
            .await?;
        hex_u64(&result, "transactionCount")
    }

    pub async fn call(&self, req: &CallRequest<'_>, block: BlockTag) -> Result<Vec<u8>, LedgerError> {
        let result = self
            .request_with_retry("eth_call", json!([req.to_param(), block.to_param()]))
            .await?;
        let s = result
            .as_str()
            .ok_or_else(|| LedgerError::Decode("eth_call result not string".into()))?;
        parse_hex_bytes(s).map_err(|e| LedgerError::Decode(e.to_string()))
    }

    pub async fn estimate_gas(&self, req: &CallRequest<'_>) -> Result<u64, LedgerError> {
        let result = self
            .request_with_retry("eth_estimateGas", json!([req.to_param()]))
            .await?;
        hex_u64(&result, "estimateGas")
    }

    pub async fn get_logs(&self, filter: Value) -> Result<Vec<Value>, LedgerError> {
        let result = self.request_with_retry("eth_getLogs", json!([filter])).await?;
        result
            .as_array()
            .cloned()
            .ok_or_else(|| LedgerError::Decode("getLogs not array".into()))
    }

    /// Single attempt; the caller decides whether resending the same payload is safe.
    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, LedgerError> {
        let result = self
            .request(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        let s = result
            .as_str()
            .ok_or_else(|| LedgerError::Decode("tx hash not string".into()))?;
        parse_b256(s).map_err(|e| LedgerError::Decode(e.to_string()))
    }

    /// `None` while the transaction is not yet mined.
    pub async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<RawReceipt>, LedgerError> {
        let result = self
            .request_with_retry("eth_getTransactionReceipt", json!([format!("0x{}", hex::encode(tx_hash))]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        parse_receipt(&result).map(Some)
    }
}

fn hex_u64(v: &Value, what: &str) -> Result<u64, LedgerError> {
    let s = v
        .as_str()
        .ok_or_else(|| LedgerError::Decode(format!("{} not string", what)))?;
    parse_hex_u64(s).map_err(|e| LedgerError::Decode(format!("{}: {}", what, e)))
}

fn parse_receipt(v: &Value) -> Result<RawReceipt, LedgerError> {
    let field = |name: &str| {
        v.get(name)
            .and_then(|f| f.as_str())
            .ok_or_else(|| LedgerError::Decode(format!("receipt missing {}", name)))
    };
    let tx_hash = parse_b256(field("transactionHash")?)
        .map_err(|e| LedgerError::Decode(e.to_string()))?;
    let block_number =
        parse_hex_u64(field("blockNumber")?).map_err(|e| LedgerError::Decode(e.to_string()))?;
    let gas_used =
        parse_hex_u64(field("gasUsed")?).map_err(|e| LedgerError::Decode(e.to_string()))?;
    // Pre-Byzantium receipts carry no status; treat them as success.
    let success = match v.get("status").and_then(|s| s.as_str()) {
        Some(s) => parse_hex_u64(s).map_err(|e| LedgerError::Decode(e.to_string()))? == 1,
        None => true,
    };
    Ok(RawReceipt {
        tx_hash,
        block_number,
        gas_used,
        success,
    })
}

/// Map a JSON-RPC error object onto the ledger error taxonomy.
pub(crate) fn classify_rpc_error(err: &Value) -> LedgerError {
    let message = err
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string();
    let data_reason = err
        .get("data")
        .and_then(|d| d.as_str())
        .and_then(|d| parse_hex_bytes(d).ok())
        .and_then(|bytes| decode_revert_reason(&bytes));
    if message.to_ascii_lowercase().contains("revert") || data_reason.is_some() {
        let reason = data_reason.unwrap_or_else(|| {
            message
                .strip_prefix("execution reverted: ")
                .unwrap_or(&message)
                .to_string()
        });
        return LedgerError::Reverted { reason };
    }
    LedgerError::Rpc(err.to_string())
}

/// True when the node reports it already holds this exact transaction.
pub(crate) fn is_already_known(err: &LedgerError) -> bool {
    match err {
        LedgerError::Rpc(msg) => {
            let msg = msg.to_ascii_lowercase();
            msg.contains("already known") || msg.contains("known transaction")
        }
        _ => false,
    }
}
