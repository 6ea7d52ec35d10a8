//! Read models for both ledgers and the transaction receipt returned by writes.

use alloy::primitives::{Address, B256, U256};

/// Registry-ledger view of an owner (`getOwnerInfo`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRecord {
    pub first_name: String,
    pub last_name: String,
    pub last_heartbeat: U256,
    /// Seconds an owner may stay silent before a grace period may start.
    pub grace_interval: U256,
    /// Terminal once consensus declared the owner deceased.
    pub is_deceased: bool,
    pub exists: bool,
}

/// Automation-ledger mirror of an owner (`getOwnerData`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OwnerMirror {
    pub grace_interval: U256,
    pub is_deceased: bool,
    pub exists: bool,
    pub last_update: U256,
}

/// Automation-ledger grace period state (`getGracePeriodInfo`). Read-only to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GracePeriodInfo {
    pub start_time: U256,
    pub has_pinged: bool,
    pub processed: bool,
    pub grace_interval: U256,
    pub is_deceased: bool,
}

/// Registry-ledger death declaration (`getDeathDeclarationStatus`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeathDeclarationStatus {
    pub is_active: bool,
    pub start_time: U256,
    pub votes_for: U256,
    pub votes_against: U256,
    pub total_voting_contacts: U256,
    pub consensus_reached: bool,
}

/// One contact of an owner with its voting state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactInfo {
    pub contact: Address,
    pub first_name: String,
    pub last_name: String,
    pub is_verified: bool,
    pub has_voted: bool,
    /// Only meaningful when `has_voted`.
    pub vote: bool,
}

/// Confirmed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
}
