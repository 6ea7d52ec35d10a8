//! Domain events observed on either ledger.

use alloy::primitives::{Address, B256, U256};
use serde::Serialize;
use std::fmt;

/// Ledger an event (or a client) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Registry,
    Automation,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Registry => "registry",
            Origin::Automation => "automation",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every event kind the relay subscribes to. Only `OwnerRegistered`, `HeartbeatSent`,
/// `ConsensusReached` and `GracePeriodProcessed` drive reconciliation; the rest are audit-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    // Registry ledger
    OwnerRegistered {
        owner: Address,
        first_name: String,
        last_name: String,
    },
    HeartbeatSent {
        owner: Address,
        timestamp: U256,
    },
    ConsensusReached {
        owner: Address,
        is_deceased: bool,
        timestamp: U256,
    },
    DeathDeclared {
        owner: Address,
        declared_by: Address,
        timestamp: U256,
    },
    ContactVerified {
        owner: Address,
        contact: Address,
    },
    VoteCast {
        owner: Address,
        contact: Address,
        vote: bool,
    },
    // Automation ledger
    GracePeriodProcessed {
        owner: Address,
        is_dead: bool,
        process_time: U256,
    },
    OwnerDataUpdated {
        owner: Address,
        grace_interval: U256,
        is_deceased: bool,
        exists: bool,
    },
    GracePeriodStarted {
        owner: Address,
        start_time: U256,
        grace_interval: U256,
    },
    OwnerPinged {
        owner: Address,
        timestamp: U256,
    },
}

impl DomainEvent {
    /// Owner address the event concerns.
    pub fn owner(&self) -> Address {
        match self {
            DomainEvent::OwnerRegistered { owner, .. }
            | DomainEvent::HeartbeatSent { owner, .. }
            | DomainEvent::ConsensusReached { owner, .. }
            | DomainEvent::DeathDeclared { owner, .. }
            | DomainEvent::ContactVerified { owner, .. }
            | DomainEvent::VoteCast { owner, .. }
            | DomainEvent::GracePeriodProcessed { owner, .. }
            | DomainEvent::OwnerDataUpdated { owner, .. }
            | DomainEvent::GracePeriodStarted { owner, .. }
            | DomainEvent::OwnerPinged { owner, .. } => *owner,
        }
    }

    /// Contract-level event name.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::OwnerRegistered { .. } => "OwnerRegistered",
            DomainEvent::HeartbeatSent { .. } => "HeartbeatSent",
            DomainEvent::ConsensusReached { .. } => "ConsensusReached",
            DomainEvent::DeathDeclared { .. } => "DeathDeclared",
            DomainEvent::ContactVerified { .. } => "ContactVerified",
            DomainEvent::VoteCast { .. } => "VoteCast",
            DomainEvent::GracePeriodProcessed { .. } => "GracePeriodProcessed",
            DomainEvent::OwnerDataUpdated { .. } => "OwnerDataUpdated",
            DomainEvent::GracePeriodStarted { .. } => "GracePeriodStarted",
            DomainEvent::OwnerPinged { .. } => "OwnerPinged",
        }
    }

    /// True for the kinds the engine reacts to.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            DomainEvent::OwnerRegistered { .. }
                | DomainEvent::HeartbeatSent { .. }
                | DomainEvent::ConsensusReached { .. }
                | DomainEvent::GracePeriodProcessed { .. }
        )
    }
}

/// A decoded event with the chain metadata of the log that carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedEvent {
    pub origin: Origin,
    pub event: DomainEvent,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}
