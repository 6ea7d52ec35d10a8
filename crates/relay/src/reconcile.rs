//! Reconciliation engine: turns an observed event into writes on the other ledger.
//!
//! Per-owner state is never materialised; it is the union of both ledgers:
//!
//! ```text
//! ACTIVE -> DEATH_VOTING -> CONSENSUS_ALIVE
//!                        -> CONSENSUS_DECEASED -> GRACE_PERIOD_RUNNING -> GRACE_PERIOD_PROCESSED
//! ```
//!
//! Every write here is idempotent on the automation ledger (full overwrite, ping timestamp
//! reset), so redelivered events are safe to handle again.

use crate::cache::StateCache;
use crate::error::LedgerError;
use crate::events::{DomainEvent, ObservedEvent};
use crate::ledger::{AutomationLedger, RegistryLedger};
use crate::types::{GracePeriodInfo, OwnerRecord, Receipt};
use alloy::primitives::{Address, B256, U256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// What a handler did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Owner mirror written to the automation ledger.
    Mirrored(Receipt),
    /// Heartbeat relayed as a ping.
    Pinged(Receipt),
    /// Consensus of death: mirror confirmed, then grace period started.
    GracePeriodStarted { mirror: Receipt, start: Receipt },
    /// Redelivered consensus of death: mirror refreshed, running grace period left alone.
    GracePeriodAlreadyStarted { mirror: Receipt },
    /// Grace period outcome recorded; nothing written.
    OutcomeRecorded,
    /// Informational event; nothing written.
    Logged,
}

/// True when `grace` was started at or after a consensus reached at `consensus_time`, or
/// is still running. Either way that consensus has already been acted on.
fn grace_period_covers(grace: &GracePeriodInfo, consensus_time: U256) -> bool {
    if grace.start_time.is_zero() {
        return false;
    }
    !grace.processed || grace.start_time >= consensus_time
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("owner {0} is not registered on the registry ledger")]
    OwnerNotFound(Address),
}

/// Final grace period determination observed on the automation ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraceOutcome {
    pub is_dead: bool,
    pub process_time: U256,
    pub block_number: u64,
    pub tx_hash: B256,
}

pub struct Engine<R, A> {
    registry: Arc<R>,
    automation: Arc<A>,
    cache: Arc<StateCache>,
    outcomes: RwLock<HashMap<Address, GraceOutcome>>,
}

impl<R: RegistryLedger, A: AutomationLedger> Engine<R, A> {
    pub fn new(registry: Arc<R>, automation: Arc<A>, cache: Arc<StateCache>) -> Self {
        Self {
            registry,
            automation,
            cache,
            outcomes: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    pub fn automation(&self) -> &Arc<A> {
        &self.automation
    }

    pub fn cache(&self) -> &Arc<StateCache> {
        &self.cache
    }

    /// Handle one event. Errors are returned to the caller (the router logs them); nothing
    /// is retried here.
    pub async fn handle(&self, ev: &ObservedEvent) -> Result<Applied, ReconcileError> {
        match &ev.event {
            DomainEvent::OwnerRegistered { owner, .. } => {
                self.mirror_owner(*owner).await.map(Applied::Mirrored)
            }
            DomainEvent::HeartbeatSent { owner, .. } => {
                let receipt = self.automation.record_ping(*owner).await?;
                Ok(Applied::Pinged(receipt))
            }
            DomainEvent::ConsensusReached {
                owner,
                is_deceased: true,
                timestamp,
            } => {
                // Mirror must be confirmed before the grace period starts, so the automation
                // ledger never computes against a stale interval.
                let mirror = self.mirror_owner(*owner).await?;
                let grace = self.automation.grace_period_info(*owner).await?;
                if grace_period_covers(&grace, *timestamp) {
                    tracing::info!(
                        %owner,
                        start_time = %grace.start_time,
                        processed = grace.processed,
                        "grace period already started for this consensus"
                    );
                    return Ok(Applied::GracePeriodAlreadyStarted { mirror });
                }
                let start = self.automation.start_grace_period(*owner).await?;
                Ok(Applied::GracePeriodStarted { mirror, start })
            }
            DomainEvent::ConsensusReached {
                owner,
                is_deceased: false,
                ..
            } => self.mirror_owner(*owner).await.map(Applied::Mirrored),
            DomainEvent::GracePeriodProcessed {
                owner,
                is_dead,
                process_time,
            } => {
                tracing::info!(
                    %owner,
                    is_dead,
                    %process_time,
                    block = ev.block_number,
                    tx_hash = %ev.tx_hash,
                    "grace period processed"
                );
                self.outcomes.write().await.insert(
                    *owner,
                    GraceOutcome {
                        is_dead: *is_dead,
                        process_time: *process_time,
                        block_number: ev.block_number,
                        tx_hash: ev.tx_hash,
                    },
                );
                Ok(Applied::OutcomeRecorded)
            }
            other => {
                tracing::debug!(
                    origin = %ev.origin,
                    kind = other.kind(),
                    owner = %other.owner(),
                    block = ev.block_number,
                    "informational event"
                );
                Ok(Applied::Logged)
            }
        }
    }

    /// Re-read the owner from the registry, refresh the cache, and overwrite the
    /// automation mirror with what the registry reports. A mirrored `is_deceased = true`
    /// is kept even when the registry read says otherwise.
    pub async fn mirror_owner(&self, owner: Address) -> Result<Receipt, ReconcileError> {
        let record = self.fresh_owner(owner).await?;
        let mut is_deceased = record.is_deceased;
        if !is_deceased && self.automation.owner_data(owner).await?.is_deceased {
            tracing::warn!(%owner, "registry reports alive but mirror is deceased, keeping deceased");
            is_deceased = true;
        }
        let receipt = self
            .automation
            .update_owner_data(owner, record.grace_interval, is_deceased, true)
            .await?;
        Ok(receipt)
    }

    /// Registry read that bypasses and then refreshes the cache.
    pub async fn fresh_owner(&self, owner: Address) -> Result<OwnerRecord, ReconcileError> {
        let record = self
            .registry
            .owner_state(owner)
            .await?
            .ok_or(ReconcileError::OwnerNotFound(owner))?;
        self.cache.put(owner, record.clone()).await;
        Ok(record)
    }

    /// Cached owner record, falling back to (and refreshing from) the registry.
    pub async fn cached_owner(&self, owner: Address) -> Result<Option<OwnerRecord>, LedgerError> {
        if let Some(record) = self.cache.get(&owner).await {
            return Ok(Some(record));
        }
        let record = self.registry.owner_state(owner).await?;
        if let Some(record) = &record {
            self.cache.put(owner, record.clone()).await;
        }
        Ok(record)
    }

    /// Last grace period outcome observed for `owner` since the relay started.
    pub async fn outcome(&self, owner: &Address) -> Option<GraceOutcome> {
        self.outcomes.read().await.get(owner).copied()
    }
}
