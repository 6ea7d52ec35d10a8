//! Event router: one consumer loop per ledger stream.
//!
//! Each event is handed to the engine in its own task so a slow confirmation on one owner
//! never holds up the next event. Handler failures are logged with the event's context and
//! counted; they never end the loop.

use crate::events::{ObservedEvent, Origin};
use crate::ledger::{AutomationLedger, EventStream, RegistryLedger};
use crate::reconcile::Engine;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Counters shared by both router loops.
#[derive(Debug, Default)]
pub struct RouterStats {
    received: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    stream_errors: AtomicU64,
}

/// Point-in-time copy of [RouterStats].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterCounters {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub stream_errors: u64,
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterCounters {
        RouterCounters {
            received: self.received.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
        }
    }
}

/// Consume `events` until shutdown or until the stream ends, then wait for in-flight
/// handlers so no transaction is abandoned mid-submission.
pub async fn route<R, A>(
    origin: Origin,
    engine: Arc<Engine<R, A>>,
    mut events: EventStream,
    stats: Arc<RouterStats>,
    mut shutdown: watch::Receiver<bool>,
) where
    R: RegistryLedger,
    A: AutomationLedger,
{
    let mut in_flight = JoinSet::new();
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(%origin, reason = %e, "event handler task panicked");
                }
            }
            item = events.recv() => match item {
                None => {
                    tracing::debug!(%origin, "event stream ended");
                    break;
                }
                Some(Err(e)) => {
                    stats.stream_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(%origin, reason = %e, "event stream error");
                }
                Some(Ok(ev)) => {
                    stats.received.fetch_add(1, Ordering::Relaxed);
                    if ev.event.is_actionable() {
                        tracing::info!(
                            %origin,
                            kind = ev.event.kind(),
                            owner = %ev.event.owner(),
                            tx_hash = %ev.tx_hash,
                            block = ev.block_number,
                            "event received"
                        );
                    } else {
                        tracing::debug!(
                            %origin,
                            kind = ev.event.kind(),
                            owner = %ev.event.owner(),
                            tx_hash = %ev.tx_hash,
                            block = ev.block_number,
                            "event received"
                        );
                    }
                    in_flight.spawn(dispatch(Arc::clone(&engine), ev, Arc::clone(&stats)));
                }
            },
        }
    }
    if !in_flight.is_empty() {
        tracing::info!(%origin, pending = in_flight.len(), "waiting for in-flight handlers");
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::error!(%origin, reason = %e, "event handler task panicked");
        }
    }
}

/// Run one handler; the error boundary for a single event.
async fn dispatch<R, A>(engine: Arc<Engine<R, A>>, ev: ObservedEvent, stats: Arc<RouterStats>)
where
    R: RegistryLedger,
    A: AutomationLedger,
{
    match engine.handle(&ev).await {
        Ok(applied) => {
            stats.succeeded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                origin = %ev.origin,
                kind = ev.event.kind(),
                owner = %ev.event.owner(),
                ?applied,
                "event handled"
            );
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                origin = %ev.origin,
                kind = ev.event.kind(),
                owner = %ev.event.owner(),
                tx_hash = %ev.tx_hash,
                block = ev.block_number,
                reason = %e,
                "event processed with error"
            );
        }
    }
}
