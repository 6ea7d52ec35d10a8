//! Short-TTL memoization of registry owner records.
//!
//! A read-reduction layer only: reconciliation always re-reads the registry before
//! mirroring, and the cache is refreshed with whatever it read.

use crate::types::OwnerRecord;
use alloy::primitives::Address;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Default time-to-live of an entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    record: OwnerRecord,
    last_update: Instant,
}

/// Address-keyed owner cache. One lock for the whole map; contention is low.
#[derive(Debug)]
pub struct StateCache {
    ttl: Duration,
    entries: RwLock<HashMap<Address, CacheEntry>>,
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl StateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached record, or `None` on a miss. Entries past the TTL read as a miss even before
    /// eviction runs.
    pub async fn get(&self, owner: &Address) -> Option<OwnerRecord> {
        let entries = self.entries.read().await;
        entries
            .get(owner)
            .filter(|e| e.last_update.elapsed() < self.ttl)
            .map(|e| e.record.clone())
    }

    /// Unconditional overwrite; last write wins by wall clock.
    pub async fn put(&self, owner: Address, record: OwnerRecord) {
        let mut entries = self.entries.write().await;
        entries.insert(
            owner,
            CacheEntry {
                record,
                last_update: Instant::now(),
            },
        );
    }

    /// Drop entries older than the TTL. Returns how many were removed.
    pub async fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.last_update.elapsed() < self.ttl);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    fn record(grace: u64) -> OwnerRecord {
        OwnerRecord {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            last_heartbeat: U256::from(1),
            grace_interval: U256::from(grace),
            is_deceased: false,
            exists: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_only_expired_entries() {
        let cache = StateCache::new(Duration::from_secs(300));
        let old = Address::repeat_byte(1);
        let fresh = Address::repeat_byte(2);
        cache.put(old, record(1)).await;
        tokio::time::advance(Duration::from_secs(200)).await;
        cache.put(fresh, record(2)).await;
        tokio::time::advance(Duration::from_secs(101)).await;

        assert_eq!(cache.evict_expired().await, 1);
        assert!(cache.get(&old).await.is_none());
        assert_eq!(cache.get(&fresh).await, Some(record(2)));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_reads_as_miss_before_eviction() {
        let cache = StateCache::new(Duration::from_secs(10));
        let owner = Address::repeat_byte(3);
        cache.put(owner, record(7)).await;
        assert!(cache.get(&owner).await.is_some());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cache.get(&owner).await.is_none());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn put_overwrites() {
        let cache = StateCache::default();
        let owner = Address::repeat_byte(4);
        cache.put(owner, record(1)).await;
        cache.put(owner, record(2)).await;
        assert_eq!(cache.get(&owner).await.unwrap().grace_interval, U256::from(2));
        assert!(!cache.is_empty().await);
        assert_eq!(cache.ttl(), DEFAULT_TTL);
    }
}
