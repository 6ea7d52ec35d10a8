//! Lifecycle: idempotent start/stop, one subscription and one timer of each kind per run.

mod common;

use common::{eventually, observed, owner, record, MockAutomation, MockRegistry};
use relay::{DomainEvent, Origin, StateCache, Supervisor, SupervisorError, SupervisorIntervals};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

type Relay = Supervisor<MockRegistry, MockAutomation>;

fn relay_with(cache: StateCache) -> (Arc<MockRegistry>, Arc<MockAutomation>, Relay) {
    let registry = Arc::new(MockRegistry::new());
    let automation = Arc::new(MockAutomation::new());
    let supervisor = Supervisor::new(
        Arc::clone(&registry),
        Arc::clone(&automation),
        Arc::new(cache),
        SupervisorIntervals {
            health_check: Duration::from_secs(30),
            cache_eviction: Duration::from_secs(60),
        },
    );
    (registry, automation, supervisor)
}

fn relay() -> (Arc<MockRegistry>, Arc<MockAutomation>, Relay) {
    relay_with(StateCache::default())
}

/// Let spawned tasks run without moving the paused clock meaningfully.
async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn start_and_stop_are_idempotent() {
    let (registry, automation, supervisor) = relay();

    supervisor.start().await.unwrap();
    supervisor.start().await.unwrap();
    assert!(supervisor.is_running());
    assert_eq!(registry.feed.subscribe_calls(), 1);
    assert_eq!(automation.feed.subscribe_calls(), 1);

    supervisor.stop().await;
    supervisor.stop().await;
    assert!(!supervisor.is_running());
    assert_eq!(registry.feed.active_streams(), 0);
    assert_eq!(automation.feed.active_streams(), 0);
}

#[tokio::test(start_paused = true)]
async fn restart_leaves_one_subscription_per_ledger() {
    let (registry, automation, supervisor) = relay();

    supervisor.start().await.unwrap();
    supervisor.stop().await;
    supervisor.start().await.unwrap();
    settle().await;

    assert_eq!(registry.feed.subscribe_calls(), 2);
    assert_eq!(registry.feed.active_streams(), 1);
    assert_eq!(automation.feed.active_streams(), 1);
    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn restart_does_not_double_health_checks() {
    let (registry, _automation, supervisor) = relay();

    supervisor.start().await.unwrap();
    settle().await;
    // One reachability check at start plus the immediate first health tick.
    assert_eq!(registry.block_calls(), 2);

    sleep(Duration::from_secs(31)).await;
    assert_eq!(registry.block_calls(), 3);

    supervisor.stop().await;
    supervisor.start().await.unwrap();
    settle().await;
    assert_eq!(registry.block_calls(), 5);

    sleep(Duration::from_secs(31)).await;
    assert_eq!(registry.block_calls(), 6);
    supervisor.stop().await;

    sleep(Duration::from_secs(120)).await;
    assert_eq!(registry.block_calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn unreachable_ledger_fails_start() {
    let (registry, automation, supervisor) = relay();
    automation.set_unreachable(true);

    let err = supervisor.start().await.unwrap_err();
    let SupervisorError::Unreachable { origin, .. } = err;
    assert_eq!(origin, Origin::Automation);
    assert!(!supervisor.is_running());
    assert_eq!(registry.feed.subscribe_calls(), 0);

    automation.set_unreachable(false);
    supervisor.start().await.unwrap();
    assert!(supervisor.is_running());
    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn status_answers_while_stop_drains() {
    let (registry, automation, supervisor) = relay();
    let supervisor = Arc::new(supervisor);
    registry.set_owner(owner(0x02), record(86_400, false));
    automation.set_write_delay(Duration::from_secs(10));
    supervisor.start().await.unwrap();

    registry.feed.emit(Ok(observed(
        Origin::Registry,
        DomainEvent::OwnerRegistered {
            owner: owner(0x02),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
        },
        1,
    )));
    assert!(eventually(Duration::from_secs(1), || supervisor.counters().received == 1).await);

    let stopping = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.stop().await }
    });
    settle().await;

    let status = tokio::time::timeout(Duration::from_secs(1), supervisor.status())
        .await
        .expect("status blocked behind stop");
    assert!(!status.running);
    assert!(automation.writes().is_empty());

    stopping.await.unwrap();
    assert_eq!(automation.writes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_health_check_is_reported_not_fatal() {
    let (_registry, automation, supervisor) = relay();
    supervisor.start().await.unwrap();
    settle().await;

    let status = supervisor.status().await;
    assert!(status.health.automation.healthy);
    assert_eq!(status.health.automation.last_block, Some(200));

    automation.set_unreachable(true);
    sleep(Duration::from_secs(31)).await;
    let status = supervisor.status().await;
    assert!(status.running);
    assert!(!status.health.automation.healthy);
    assert!(status.health.automation.last_error.is_some());
    assert_eq!(status.health.automation.last_block, Some(200));
    assert!(status.health.registry.healthy);

    automation.set_unreachable(false);
    let snapshot = supervisor.check_health().await;
    assert!(snapshot.automation.healthy);
    assert_eq!(snapshot.automation.last_error, None);
    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn eviction_timer_drops_expired_entries() {
    let (_registry, _automation, supervisor) = relay_with(StateCache::new(Duration::from_secs(10)));
    supervisor.cache().put(owner(0x01), record(86_400, false)).await;
    supervisor.start().await.unwrap();
    settle().await;
    assert_eq!(supervisor.status().await.cache_size, 1);

    sleep(Duration::from_secs(61)).await;
    assert_eq!(supervisor.status().await.cache_size, 0);
    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn status_reports_signers() {
    let (registry, automation, supervisor) = relay();
    let status = supervisor.status().await;
    assert!(!status.running);
    assert_eq!(status.registry_signer, relay::Ledger::signer_address(registry.as_ref()));
    assert_eq!(status.automation_signer, relay::Ledger::signer_address(automation.as_ref()));
    assert_eq!(status.events, Default::default());
}
