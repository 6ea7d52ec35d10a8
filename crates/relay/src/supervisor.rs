//! Lifecycle supervisor: starts and stops the relay, runs periodic health checks and cache
//! eviction.
//!
//! `start()` and `stop()` are idempotent, and a stop followed by a start leaves exactly one
//! subscription per ledger and one timer of each kind.

use crate::cache::StateCache;
use crate::error::LedgerError;
use crate::events::Origin;
use crate::ledger::{AutomationLedger, Ledger, RegistryLedger};
use crate::reconcile::Engine;
use crate::router::{route, RouterCounters, RouterStats};
use alloy::primitives::Address;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{origin} ledger unreachable: {source}")]
    Unreachable {
        origin: Origin,
        #[source]
        source: LedgerError,
    },
}

/// Periodic task intervals.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorIntervals {
    pub health_check: Duration,
    pub cache_eviction: Duration,
}

impl Default for SupervisorIntervals {
    fn default() -> Self {
        Self {
            health_check: Duration::from_secs(30),
            cache_eviction: Duration::from_secs(10 * 60),
        }
    }
}

/// Result of the last health check against one ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerHealth {
    pub healthy: bool,
    pub last_block: Option<u64>,
    pub last_error: Option<String>,
}

/// Last health check against both ledgers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub registry: LedgerHealth,
    pub automation: LedgerHealth,
}

/// Operational status exposed by the control surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStatus {
    pub running: bool,
    pub cache_size: usize,
    pub registry_signer: Address,
    pub automation_signer: Address,
    pub health: HealthSnapshot,
    pub events: RouterCounters,
}

struct Running {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Supervisor<R, A> {
    engine: Arc<Engine<R, A>>,
    stats: Arc<RouterStats>,
    health: Arc<RwLock<HealthSnapshot>>,
    intervals: SupervisorIntervals,
    /// Serializes start and stop; held across a stop's drain.
    running: Mutex<Option<Running>>,
    /// Readable without waiting on a start or stop in progress.
    active: AtomicBool,
}

impl<R: RegistryLedger, A: AutomationLedger> Supervisor<R, A> {
    pub fn new(
        registry: Arc<R>,
        automation: Arc<A>,
        cache: Arc<StateCache>,
        intervals: SupervisorIntervals,
    ) -> Self {
        Self {
            engine: Arc::new(Engine::new(registry, automation, cache)),
            stats: Arc::new(RouterStats::default()),
            health: Arc::new(RwLock::new(HealthSnapshot::default())),
            intervals,
            running: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    pub fn engine(&self) -> &Arc<Engine<R, A>> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<R> {
        self.engine.registry()
    }

    pub fn automation(&self) -> &Arc<A> {
        self.engine.automation()
    }

    pub fn cache(&self) -> &Arc<StateCache> {
        self.engine.cache()
    }

    /// Event counters of both router loops since construction.
    pub fn counters(&self) -> RouterCounters {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Verify both ledgers, open both subscriptions, start both router loops and both
    /// timers. No-op with a warning when already running.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::warn!("relay already running, start ignored");
            return Ok(());
        }

        let registry_block = self
            .registry()
            .block_number()
            .await
            .map_err(|source| SupervisorError::Unreachable {
                origin: Origin::Registry,
                source,
            })?;
        let automation_block = self
            .automation()
            .block_number()
            .await
            .map_err(|source| SupervisorError::Unreachable {
                origin: Origin::Automation,
                source,
            })?;
        tracing::info!(
            registry_block,
            automation_block,
            registry_signer = %self.registry().signer_address(),
            automation_signer = %self.automation().signer_address(),
            "ledgers reachable, starting relay"
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(6);

        let (registry_events, registry_sub) = self.registry().subscribe(shutdown_rx.clone());
        let (automation_events, automation_sub) = self.automation().subscribe(shutdown_rx.clone());
        tasks.push(registry_sub);
        tasks.push(automation_sub);
        tasks.push(tokio::spawn(route(
            Origin::Registry,
            Arc::clone(&self.engine),
            registry_events,
            Arc::clone(&self.stats),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(route(
            Origin::Automation,
            Arc::clone(&self.engine),
            automation_events,
            Arc::clone(&self.stats),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(health_loop(
            Arc::clone(self.registry()),
            Arc::clone(self.automation()),
            Arc::clone(&self.health),
            self.intervals.health_check,
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(eviction_loop(
            Arc::clone(self.cache()),
            self.intervals.cache_eviction,
            shutdown_rx,
        )));

        *running = Some(Running { shutdown, tasks });
        self.active.store(true, Ordering::Release);
        tracing::info!("relay started");
        Ok(())
    }

    /// Signal shutdown and wait for every task. Router loops finish their in-flight
    /// handlers first, so no submission is cut off. No-op with a warning when stopped.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(Running { shutdown, tasks }) = running.take() else {
            tracing::warn!("relay not running, stop ignored");
            return;
        };
        self.active.store(false, Ordering::Release);
        let _ = shutdown.send(true);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(reason = %e, "relay task ended abnormally");
            }
        }
        tracing::info!("relay stopped");
    }

    /// One health check against both ledgers; also what the periodic task runs.
    pub async fn check_health(&self) -> HealthSnapshot {
        check_health(self.registry().as_ref(), self.automation().as_ref(), &self.health).await
    }

    pub async fn status(&self) -> RelayStatus {
        RelayStatus {
            running: self.is_running(),
            cache_size: self.cache().len().await,
            registry_signer: self.registry().signer_address(),
            automation_signer: self.automation().signer_address(),
            health: self.health.read().await.clone(),
            events: self.counters(),
        }
    }
}

async fn check_ledger<L: Ledger>(ledger: &L) -> LedgerHealth {
    match ledger.block_number().await {
        Ok(block) => LedgerHealth {
            healthy: true,
            last_block: Some(block),
            last_error: None,
        },
        Err(e) => {
            tracing::warn!(origin = %ledger.origin(), reason = %e, "health check failed");
            LedgerHealth {
                healthy: false,
                last_block: None,
                last_error: Some(e.to_string()),
            }
        }
    }
}

async fn check_health<R: Ledger, A: Ledger>(
    registry: &R,
    automation: &A,
    health: &RwLock<HealthSnapshot>,
) -> HealthSnapshot {
    let (registry, automation) = tokio::join!(check_ledger(registry), check_ledger(automation));
    let mut guard = health.write().await;
    // Keep the last known block through a failed check.
    let snapshot = HealthSnapshot {
        registry: LedgerHealth {
            last_block: registry.last_block.or(guard.registry.last_block),
            ..registry
        },
        automation: LedgerHealth {
            last_block: automation.last_block.or(guard.automation.last_block),
            ..automation
        },
    };
    *guard = snapshot.clone();
    tracing::debug!(
        registry_block = ?snapshot.registry.last_block,
        automation_block = ?snapshot.automation.last_block,
        "health check"
    );
    snapshot
}

async fn health_loop<R: Ledger, A: Ledger>(
    registry: Arc<R>,
    automation: Arc<A>,
    health: Arc<RwLock<HealthSnapshot>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                check_health(registry.as_ref(), automation.as_ref(), &health).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn eviction_loop(cache: Arc<StateCache>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; nothing can have expired yet.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = cache.evict_expired().await;
                if evicted > 0 {
                    let remaining = cache.len().await;
                    tracing::debug!(evicted, remaining, "cache eviction");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
