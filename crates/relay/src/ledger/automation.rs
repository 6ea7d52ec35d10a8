//! Automation ledger client: owner mirror and grace period reads, the three relay writes,
//! and its event stream.

use super::{AutomationLedger, EventStream, Ledger, LedgerClient};
use crate::abi::{automation_topics, decode_automation_log, IAutomation};
use crate::config::{ClientSettings, LedgerConfig};
use crate::error::LedgerError;
use crate::events::Origin;
use crate::types::{GracePeriodInfo, OwnerMirror, Receipt};
use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct AutomationClient {
    inner: LedgerClient,
}

impl AutomationClient {
    pub fn new(config: &LedgerConfig, settings: &ClientSettings) -> Result<Self, LedgerError> {
        Ok(Self {
            inner: LedgerClient::new(Origin::Automation, config, settings)?,
        })
    }

    pub fn client(&self) -> &LedgerClient {
        &self.inner
    }
}

impl Ledger for AutomationClient {
    fn origin(&self) -> Origin {
        Origin::Automation
    }

    fn signer_address(&self) -> Address {
        self.inner.signer_address()
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.inner.block_number().await
    }

    fn subscribe(&self, shutdown: watch::Receiver<bool>) -> (EventStream, JoinHandle<()>) {
        self.inner
            .subscribe(automation_topics(), decode_automation_log, shutdown)
    }
}

impl AutomationLedger for AutomationClient {
    async fn owner_data(&self, owner: Address) -> Result<OwnerMirror, LedgerError> {
        let ret = self
            .inner
            .view(IAutomation::getOwnerDataCall { owner })
            .await?;
        Ok(OwnerMirror {
            grace_interval: ret.graceInterval,
            is_deceased: ret.isDeceased,
            exists: ret.exists,
            last_update: ret.lastUpdate,
        })
    }

    async fn grace_period_info(&self, owner: Address) -> Result<GracePeriodInfo, LedgerError> {
        let ret = self
            .inner
            .view(IAutomation::getGracePeriodInfoCall { owner })
            .await?;
        Ok(GracePeriodInfo {
            start_time: ret.startTime,
            has_pinged: ret.hasPinged,
            processed: ret.processed,
            grace_interval: ret.graceInterval,
            is_deceased: ret.isDeceased,
        })
    }

    async fn update_owner_data(
        &self,
        owner: Address,
        grace_interval: U256,
        is_deceased: bool,
        exists: bool,
    ) -> Result<Receipt, LedgerError> {
        let calldata = IAutomation::updateOwnerDataCall {
            owner,
            graceInterval: grace_interval,
            isDeceased: is_deceased,
            exists,
        }
        .abi_encode();
        self.inner
            .submit_transaction("updateOwnerData", owner, calldata)
            .await
    }

    async fn start_grace_period(&self, owner: Address) -> Result<Receipt, LedgerError> {
        let calldata = IAutomation::startGracePeriodCall { owner }.abi_encode();
        self.inner
            .submit_transaction("startGracePeriod", owner, calldata)
            .await
    }

    async fn record_ping(&self, owner: Address) -> Result<Receipt, LedgerError> {
        let calldata = IAutomation::recordPingCall { owner }.abi_encode();
        self.inner
            .submit_transaction("recordPing", owner, calldata)
            .await
    }
}
