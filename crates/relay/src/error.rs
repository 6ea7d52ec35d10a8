//! Error taxonomy shared by the ledger clients and startup configuration.

use alloy::primitives::B256;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Transport or node-side failure. Retryable.
    #[error("RPC error: {0}")]
    Rpc(String),
    /// Contract-level rejection. Not retryable without a state change.
    #[error("transaction reverted: {reason}")]
    Reverted { reason: String },
    /// Not confirmed in time; may or may not have landed. Resolve by re-reading state.
    #[error("transaction {tx_hash} not confirmed within {waited:?}")]
    Timeout { tx_hash: B256, waited: Duration },
    /// Subscription dropped; the subscription task resubscribes with backoff.
    #[error("subscription stream error: {0}")]
    Stream(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Rpc(_))
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        LedgerError::Rpc(e.to_string())
    }
}

/// Fatal startup configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
