//! ABI surface of the registry and automation contracts.
//!
//! Calls and return values go through the `sol!` interfaces below. Logs arrive as JSON-RPC
//! values (eth_subscription / eth_getLogs shape) and are decoded into [DomainEvent]s here.

use crate::events::DomainEvent;
use alloy::primitives::{Address, B256};
use alloy::sol;
use alloy::sol_types::{Revert, SolError, SolEvent};
use anyhow::{Context, Result};
use serde_json::Value;

sol! {
    interface IRegistry {
        function getOwnerInfo(address owner) external view returns (
            string memory firstName,
            string memory lastName,
            uint256 lastHeartbeat,
            uint256 graceInterval,
            bool isDeceased,
            bool exists
        );
        function getDeathDeclarationStatus(address owner) external view returns (
            bool isActive,
            uint256 startTime,
            uint256 votesFor,
            uint256 votesAgainst,
            uint256 totalVotingContacts,
            bool consensusReached
        );
        function getContactInfo(address owner, address contact) external view returns (
            string memory firstName,
            string memory lastName,
            bool isVerified,
            bool exists
        );
        function getContactList(address owner) external view returns (address[] memory contacts);
        function hasVoted(address owner, address contact) external view returns (bool voted);
        function getVote(address owner, address contact) external view returns (bool vote);

        event OwnerRegistered(address indexed owner, string firstName, string lastName);
        event HeartbeatSent(address indexed owner, uint256 timestamp);
        event DeathDeclared(address indexed owner, address indexed declaredBy, uint256 timestamp);
        event ConsensusReached(address indexed owner, bool isDeceased, uint256 timestamp);
        event ContactVerified(address indexed owner, address indexed contact);
        event VoteCast(address indexed owner, address indexed contact, bool vote);
    }

    interface IAutomation {
        function getOwnerData(address owner) external view returns (
            uint256 graceInterval,
            bool isDeceased,
            bool exists,
            uint256 lastUpdate
        );
        function getGracePeriodInfo(address owner) external view returns (
            uint256 startTime,
            bool hasPinged,
            bool processed,
            uint256 graceInterval,
            bool isDeceased
        );
        function updateOwnerData(address owner, uint256 graceInterval, bool isDeceased, bool exists) external;
        function startGracePeriod(address owner) external;
        function recordPing(address owner) external;

        event OwnerDataUpdated(address indexed owner, uint256 graceInterval, bool isDeceased, bool exists);
        event GracePeriodStarted(address indexed owner, uint256 startTime, uint256 graceInterval);
        event OwnerPinged(address indexed owner, uint256 timestamp);
        event GracePeriodProcessed(address indexed owner, bool isDead, uint256 processTime);
    }
}

/// A log as delivered by the node, before event decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    /// Set by the node when the log was dropped by a reorg.
    pub removed: bool,
}

impl RawLog {
    pub fn topic0(&self) -> Option<B256> {
        self.topics.first().copied()
    }
}

/// Topic0 of every registry event the relay subscribes to.
pub fn registry_topics() -> Vec<B256> {
    vec![
        IRegistry::OwnerRegistered::SIGNATURE_HASH,
        IRegistry::HeartbeatSent::SIGNATURE_HASH,
        IRegistry::DeathDeclared::SIGNATURE_HASH,
        IRegistry::ConsensusReached::SIGNATURE_HASH,
        IRegistry::ContactVerified::SIGNATURE_HASH,
        IRegistry::VoteCast::SIGNATURE_HASH,
    ]
}

/// Topic0 of every automation event the relay subscribes to.
pub fn automation_topics() -> Vec<B256> {
    vec![
        IAutomation::OwnerDataUpdated::SIGNATURE_HASH,
        IAutomation::GracePeriodStarted::SIGNATURE_HASH,
        IAutomation::OwnerPinged::SIGNATURE_HASH,
        IAutomation::GracePeriodProcessed::SIGNATURE_HASH,
    ]
}

fn decode_event<E: SolEvent>(log: &RawLog) -> Result<E> {
    E::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .with_context(|| format!("decode {}", E::SIGNATURE))
}

/// Decode a registry log. `Ok(None)` for logs whose topic0 is not a registry event.
pub fn decode_registry_log(log: &RawLog) -> Result<Option<DomainEvent>> {
    let Some(topic0) = log.topic0() else {
        return Ok(None);
    };
    let event = if topic0 == IRegistry::OwnerRegistered::SIGNATURE_HASH {
        let e: IRegistry::OwnerRegistered = decode_event(log)?;
        DomainEvent::OwnerRegistered {
            owner: e.owner,
            first_name: e.firstName,
            last_name: e.lastName,
        }
    } else if topic0 == IRegistry::HeartbeatSent::SIGNATURE_HASH {
        let e: IRegistry::HeartbeatSent = decode_event(log)?;
        DomainEvent::HeartbeatSent {
            owner: e.owner,
            timestamp: e.timestamp,
        }
    } else if topic0 == IRegistry::DeathDeclared::SIGNATURE_HASH {
        let e: IRegistry::DeathDeclared = decode_event(log)?;
        DomainEvent::DeathDeclared {
            owner: e.owner,
            declared_by: e.declaredBy,
            timestamp: e.timestamp,
        }
    } else if topic0 == IRegistry::ConsensusReached::SIGNATURE_HASH {
        let e: IRegistry::ConsensusReached = decode_event(log)?;
        DomainEvent::ConsensusReached {
            owner: e.owner,
            is_deceased: e.isDeceased,
            timestamp: e.timestamp,
        }
    } else if topic0 == IRegistry::ContactVerified::SIGNATURE_HASH {
        let e: IRegistry::ContactVerified = decode_event(log)?;
        DomainEvent::ContactVerified {
            owner: e.owner,
            contact: e.contact,
        }
    } else if topic0 == IRegistry::VoteCast::SIGNATURE_HASH {
        let e: IRegistry::VoteCast = decode_event(log)?;
        DomainEvent::VoteCast {
            owner: e.owner,
            contact: e.contact,
            vote: e.vote,
        }
    } else {
        return Ok(None);
    };
    Ok(Some(event))
}

/// Decode an automation log. `Ok(None)` for logs whose topic0 is not an automation event.
pub fn decode_automation_log(log: &RawLog) -> Result<Option<DomainEvent>> {
    let Some(topic0) = log.topic0() else {
        return Ok(None);
    };
    let event = if topic0 == IAutomation::GracePeriodProcessed::SIGNATURE_HASH {
        let e: IAutomation::GracePeriodProcessed = decode_event(log)?;
        DomainEvent::GracePeriodProcessed {
            owner: e.owner,
            is_dead: e.isDead,
            process_time: e.processTime,
        }
    } else if topic0 == IAutomation::OwnerDataUpdated::SIGNATURE_HASH {
        let e: IAutomation::OwnerDataUpdated = decode_event(log)?;
        DomainEvent::OwnerDataUpdated {
            owner: e.owner,
            grace_interval: e.graceInterval,
            is_deceased: e.isDeceased,
            exists: e.exists,
        }
    } else if topic0 == IAutomation::GracePeriodStarted::SIGNATURE_HASH {
        let e: IAutomation::GracePeriodStarted = decode_event(log)?;
        DomainEvent::GracePeriodStarted {
            owner: e.owner,
            start_time: e.startTime,
            grace_interval: e.graceInterval,
        }
    } else if topic0 == IAutomation::OwnerPinged::SIGNATURE_HASH {
        let e: IAutomation::OwnerPinged = decode_event(log)?;
        DomainEvent::OwnerPinged {
            owner: e.owner,
            timestamp: e.timestamp,
        }
    } else {
        return Ok(None);
    };
    Ok(Some(event))
}

/// Parse a JSON-RPC log object. Pending logs (no block number yet) are rejected.
pub fn parse_log(log_value: &Value) -> Result<RawLog> {
    let address = parse_address(
        log_value
            .get("address")
            .and_then(|a| a.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing address"))?,
    )?;
    let block_number = parse_hex_u64(
        log_value
            .get("blockNumber")
            .and_then(|n| n.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing blockNumber (pending log?)"))?,
    )?;
    let log_index = parse_hex_u64(
        log_value
            .get("logIndex")
            .and_then(|n| n.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing logIndex"))?,
    )?;
    let tx_hash = parse_b256(
        log_value
            .get("transactionHash")
            .and_then(|h| h.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing transactionHash"))?,
    )?;
    let data = parse_hex_bytes(
        log_value
            .get("data")
            .and_then(|d| d.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing data"))?,
    )?;
    let topics = log_value
        .get("topics")
        .and_then(|t| t.as_array())
        .ok_or_else(|| anyhow::anyhow!("Missing topics"))?
        .iter()
        .map(|t| {
            t.as_str()
                .ok_or_else(|| anyhow::anyhow!("topic not str"))
                .and_then(parse_b256)
        })
        .collect::<Result<Vec<_>>>()?;
    let removed = log_value
        .get("removed")
        .and_then(|r| r.as_bool())
        .unwrap_or(false);

    Ok(RawLog {
        address,
        topics,
        data,
        block_number,
        tx_hash,
        log_index,
        removed,
    })
}

/// Reason string carried by an `Error(string)` revert payload, if that is what `data` is.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    Revert::abi_decode(data, true).ok().map(|r| r.reason)
}

pub(crate) fn parse_hex_u64(s: &str) -> Result<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).context("parse hex u64")
}

pub(crate) fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).context("parse hex bytes")
}

pub(crate) fn parse_b256(s: &str) -> Result<B256> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("Expected 32 bytes, got {}", bytes.len());
    }
    Ok(B256::from_slice(&bytes))
}

pub(crate) fn parse_address(s: &str) -> Result<Address> {
    let bytes = parse_hex_bytes(s)?;
    match bytes.len() {
        20 => Ok(Address::from_slice(&bytes)),
        // Indexed address in EVM is 32 bytes (left-padded); take last 20.
        32 => Ok(Address::from_slice(&bytes[12..32])),
        n => anyhow::bail!("Expected 20 or 32 bytes for address, got {}", n),
    }
}
