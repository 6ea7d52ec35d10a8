//! Registry ledger client: owner, contact and death-declaration reads, plus its event stream.

use super::{EventStream, Ledger, LedgerClient, RegistryLedger};
use crate::abi::{decode_registry_log, registry_topics, IRegistry};
use crate::config::{ClientSettings, LedgerConfig};
use crate::error::LedgerError;
use crate::events::Origin;
use crate::types::{ContactInfo, DeathDeclarationStatus, OwnerRecord};
use alloy::primitives::Address;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct RegistryClient {
    inner: LedgerClient,
}

impl RegistryClient {
    pub fn new(config: &LedgerConfig, settings: &ClientSettings) -> Result<Self, LedgerError> {
        Ok(Self {
            inner: LedgerClient::new(Origin::Registry, config, settings)?,
        })
    }

    pub fn client(&self) -> &LedgerClient {
        &self.inner
    }

    pub async fn contact_list(&self, owner: Address) -> Result<Vec<Address>, LedgerError> {
        let ret = self
            .inner
            .view(IRegistry::getContactListCall { owner })
            .await?;
        Ok(ret.contacts)
    }

    /// `(first_name, last_name, is_verified)`, or `None` for an unknown contact.
    pub async fn contact_info(
        &self,
        owner: Address,
        contact: Address,
    ) -> Result<Option<(String, String, bool)>, LedgerError> {
        let ret = self
            .inner
            .view(IRegistry::getContactInfoCall { owner, contact })
            .await?;
        Ok(ret.exists.then_some((ret.firstName, ret.lastName, ret.isVerified)))
    }

    pub async fn has_voted(&self, owner: Address, contact: Address) -> Result<bool, LedgerError> {
        let ret = self
            .inner
            .view(IRegistry::hasVotedCall { owner, contact })
            .await?;
        Ok(ret.voted)
    }

    pub async fn vote(&self, owner: Address, contact: Address) -> Result<bool, LedgerError> {
        let ret = self
            .inner
            .view(IRegistry::getVoteCall { owner, contact })
            .await?;
        Ok(ret.vote)
    }
}

impl Ledger for RegistryClient {
    fn origin(&self) -> Origin {
        Origin::Registry
    }

    fn signer_address(&self) -> Address {
        self.inner.signer_address()
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.inner.block_number().await
    }

    fn subscribe(&self, shutdown: watch::Receiver<bool>) -> (EventStream, JoinHandle<()>) {
        self.inner
            .subscribe(registry_topics(), decode_registry_log, shutdown)
    }
}

impl RegistryLedger for RegistryClient {
    async fn owner_state(&self, owner: Address) -> Result<Option<OwnerRecord>, LedgerError> {
        let ret = match self.inner.view(IRegistry::getOwnerInfoCall { owner }).await {
            Ok(ret) => ret,
            // Registries commonly guard reads of unknown owners with a require().
            Err(LedgerError::Reverted { reason }) => {
                tracing::debug!(%owner, %reason, "getOwnerInfo reverted, treating as not registered");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if !ret.exists {
            return Ok(None);
        }
        Ok(Some(OwnerRecord {
            first_name: ret.firstName,
            last_name: ret.lastName,
            last_heartbeat: ret.lastHeartbeat,
            grace_interval: ret.graceInterval,
            is_deceased: ret.isDeceased,
            exists: ret.exists,
        }))
    }

    async fn death_declaration_status(
        &self,
        owner: Address,
    ) -> Result<DeathDeclarationStatus, LedgerError> {
        let ret = self
            .inner
            .view(IRegistry::getDeathDeclarationStatusCall { owner })
            .await?;
        Ok(DeathDeclarationStatus {
            is_active: ret.isActive,
            start_time: ret.startTime,
            votes_for: ret.votesFor,
            votes_against: ret.votesAgainst,
            total_voting_contacts: ret.totalVotingContacts,
            consensus_reached: ret.consensusReached,
        })
    }

    async fn contacts(&self, owner: Address) -> Result<Vec<ContactInfo>, LedgerError> {
        let mut out = Vec::new();
        for contact in self.contact_list(owner).await? {
            let Some((first_name, last_name, is_verified)) =
                self.contact_info(owner, contact).await?
            else {
                continue;
            };
            let has_voted = self.has_voted(owner, contact).await?;
            let vote = if has_voted {
                self.vote(owner, contact).await?
            } else {
                false
            };
            out.push(ContactInfo {
                contact,
                first_name,
                last_name,
                is_verified,
                has_voted,
                vote,
            });
        }
        Ok(out)
    }
}
