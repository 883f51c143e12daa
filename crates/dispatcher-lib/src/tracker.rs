//! Model state tracking
//!
//! `ModelMapper` records which units have a model job in flight, keyed by
//! unit kind, granularity and unit identity. Every check-then-set runs under
//! a single write lock so two concurrent passes can never both publish for
//! the same key.

use crate::clock::Clock;
use crate::models::{Granularity, ModelInfo, UnitKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

type Bucket = HashMap<String, ModelInfo>;

/// Reservation returned by [`ModelMapper::try_claim`]
#[derive(Debug)]
pub struct Claim {
    pub kind: UnitKind,
    pub granularity: Granularity,
    pub key: String,
    /// Timestamp of the entry the claim inserted
    claimed_at: i64,
    /// Stale entry displaced by the claim
    previous: Option<ModelInfo>,
}

pub struct ModelMapper {
    entries: RwLock<HashMap<UnitKind, HashMap<Granularity, Bucket>>>,
    timeout_secs: i64,
    clock: Arc<dyn Clock>,
}

impl ModelMapper {
    /// Create a tracker with an empty bucket for every kind and granularity
    pub fn new(
        kinds: &[UnitKind],
        granularities: &[Granularity],
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut entries = HashMap::new();
        for kind in kinds {
            let per_kind: &mut HashMap<Granularity, Bucket> = entries.entry(*kind).or_default();
            for granularity in granularities {
                per_kind.entry(*granularity).or_default();
            }
        }

        Self {
            entries: RwLock::new(entries),
            timeout_secs: timeout.as_secs() as i64,
            clock,
        }
    }

    pub fn timeout_secs(&self) -> i64 {
        self.timeout_secs
    }

    fn expired(&self, info: &ModelInfo, now: i64) -> bool {
        now - info.timestamp > self.timeout_secs
    }

    /// True iff an entry exists for the unit
    pub async fn is_modeling(&self, kind: UnitKind, granularity: Granularity, key: &str) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(&kind)
            .and_then(|m| m.get(&granularity))
            .map(|bucket| bucket.contains_key(key))
            .unwrap_or(false)
    }

    /// True iff no entry exists or the entry is older than the timeout
    pub async fn is_model_timeout(
        &self,
        kind: UnitKind,
        granularity: Granularity,
        key: &str,
    ) -> bool {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        match entries
            .get(&kind)
            .and_then(|m| m.get(&granularity))
            .and_then(|bucket| bucket.get(key))
        {
            Some(info) => self.expired(info, now),
            None => true,
        }
    }

    /// Upsert an entry at the identity-derived key
    pub async fn add_model_info(&self, kind: UnitKind, granularity: Granularity, info: ModelInfo) {
        let mut entries = self.entries.write().await;
        entries
            .entry(kind)
            .or_default()
            .entry(granularity)
            .or_default()
            .insert(info.key(), info);
    }

    /// Delete an entry, returning it if it was present
    pub async fn remove_model_info(
        &self,
        kind: UnitKind,
        granularity: Granularity,
        key: &str,
    ) -> Option<ModelInfo> {
        let mut entries = self.entries.write().await;
        let removed = entries
            .get_mut(&kind)
            .and_then(|m| m.get_mut(&granularity))
            .and_then(|bucket| bucket.remove(key));
        if removed.is_none() {
            debug!(unit_type = %kind, granularity = %granularity, key = key, "No model entry to remove");
        }
        removed
    }

    pub async fn get_model_info(
        &self,
        kind: UnitKind,
        granularity: Granularity,
        key: &str,
    ) -> Option<ModelInfo> {
        let entries = self.entries.read().await;
        entries
            .get(&kind)
            .and_then(|m| m.get(&granularity))
            .and_then(|bucket| bucket.get(key))
            .cloned()
    }

    /// Insert `info` unless a fresh entry already exists for its key.
    ///
    /// Returns `None` when the unit is modeling and not timed out.
    pub async fn try_claim(
        &self,
        kind: UnitKind,
        granularity: Granularity,
        info: ModelInfo,
    ) -> Option<Claim> {
        let now = self.clock.now();
        let key = info.key();
        let mut entries = self.entries.write().await;
        let bucket = entries.entry(kind).or_default().entry(granularity).or_default();

        if let Some(existing) = bucket.get(&key) {
            if !self.expired(existing, now) {
                return None;
            }
        }

        let claimed_at = info.timestamp;
        let previous = bucket.insert(key.clone(), info);
        Some(Claim {
            kind,
            granularity,
            key,
            claimed_at,
            previous,
        })
    }

    /// Undo a claim whose job could not be published
    ///
    /// No-op once the entry was removed by a completion or replaced by a
    /// later claim.
    pub async fn release(&self, claim: Claim) {
        let mut entries = self.entries.write().await;
        let Some(bucket) = entries
            .get_mut(&claim.kind)
            .and_then(|m| m.get_mut(&claim.granularity))
        else {
            return;
        };

        let owned = bucket
            .get(&claim.key)
            .is_some_and(|current| current.timestamp == claim.claimed_at);
        if !owned {
            debug!(
                unit_type = %claim.kind,
                granularity = %claim.granularity,
                key = %claim.key,
                "Claimed entry already changed, nothing to release"
            );
            return;
        }

        match claim.previous {
            Some(previous) => {
                bucket.insert(claim.key, previous);
            }
            None => {
                bucket.remove(&claim.key);
            }
        }
    }

    /// Number of tracked entries for a kind and granularity
    pub async fn len(&self, kind: UnitKind, granularity: Granularity) -> usize {
        let entries = self.entries.read().await;
        entries
            .get(&kind)
            .and_then(|m| m.get(&granularity))
            .map(|bucket| bucket.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{MetricType, UnitIdentity};

    const T0: i64 = 1_700_000_000;
    const TIMEOUT: u64 = 600;

    fn mapper(clock: Arc<ManualClock>) -> ModelMapper {
        ModelMapper::new(
            &UnitKind::ALL,
            &Granularity::SUPPORTED,
            Duration::from_secs(TIMEOUT),
            clock,
        )
    }

    fn node_info(name: &str, timestamp: i64) -> ModelInfo {
        let mut info = ModelInfo::new(
            UnitIdentity::Node {
                cluster_name: "c1".into(),
                name: name.into(),
            },
            timestamp,
        );
        info.metric_types.push(MetricType::CpuUsagePercentage);
        info
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let clock = Arc::new(ManualClock::new(T0));
        let mapper = mapper(clock);
        let g = Granularity::OneHour;

        assert!(!mapper.is_modeling(UnitKind::Node, g, "c1/n1").await);
        assert!(mapper.is_model_timeout(UnitKind::Node, g, "c1/n1").await);

        mapper.add_model_info(UnitKind::Node, g, node_info("n1", T0)).await;
        assert!(mapper.is_modeling(UnitKind::Node, g, "c1/n1").await);
        assert!(!mapper.is_model_timeout(UnitKind::Node, g, "c1/n1").await);
        // Other granularities are independent
        assert!(!mapper.is_modeling(UnitKind::Node, Granularity::SixHours, "c1/n1").await);

        assert!(mapper.remove_model_info(UnitKind::Node, g, "c1/n1").await.is_some());
        assert!(!mapper.is_modeling(UnitKind::Node, g, "c1/n1").await);
        assert!(mapper.remove_model_info(UnitKind::Node, g, "c1/n1").await.is_none());
    }

    #[tokio::test]
    async fn test_timeout_boundary() {
        let clock = Arc::new(ManualClock::new(T0));
        let mapper = mapper(clock.clone());
        let g = Granularity::ThirtySeconds;
        mapper.add_model_info(UnitKind::Node, g, node_info("n1", T0)).await;

        clock.set(T0 + TIMEOUT as i64 - 1);
        assert!(!mapper.is_model_timeout(UnitKind::Node, g, "c1/n1").await);

        clock.set(T0 + TIMEOUT as i64);
        assert!(!mapper.is_model_timeout(UnitKind::Node, g, "c1/n1").await);

        clock.set(T0 + TIMEOUT as i64 + 1);
        assert!(mapper.is_model_timeout(UnitKind::Node, g, "c1/n1").await);
    }

    #[tokio::test]
    async fn test_second_claim_is_suppressed() {
        let clock = Arc::new(ManualClock::new(T0));
        let mapper = mapper(clock.clone());
        let g = Granularity::OneHour;

        assert!(mapper.try_claim(UnitKind::Node, g, node_info("n1", T0)).await.is_some());
        clock.advance(60);
        assert!(mapper.try_claim(UnitKind::Node, g, node_info("n1", T0 + 60)).await.is_none());

        // Entry keeps its original timestamp
        let info = mapper.get_model_info(UnitKind::Node, g, "c1/n1").await.unwrap();
        assert_eq!(info.timestamp, T0);
    }

    #[tokio::test]
    async fn test_claim_after_timeout_replaces_entry() {
        let clock = Arc::new(ManualClock::new(T0));
        let mapper = mapper(clock.clone());
        let g = Granularity::OneHour;

        mapper.add_model_info(UnitKind::Node, g, node_info("n1", T0)).await;
        clock.advance(TIMEOUT as i64 + 1);

        let now = T0 + TIMEOUT as i64 + 1;
        let claim = mapper.try_claim(UnitKind::Node, g, node_info("n1", now)).await;
        assert!(claim.is_some());
        let info = mapper.get_model_info(UnitKind::Node, g, "c1/n1").await.unwrap();
        assert_eq!(info.timestamp, now);

        // Releasing restores the displaced entry
        mapper.release(claim.unwrap()).await;
        let info = mapper.get_model_info(UnitKind::Node, g, "c1/n1").await.unwrap();
        assert_eq!(info.timestamp, T0);
    }

    #[tokio::test]
    async fn test_release_without_previous_removes() {
        let clock = Arc::new(ManualClock::new(T0));
        let mapper = mapper(clock);
        let g = Granularity::TwentyFourHours;

        let claim = mapper.try_claim(UnitKind::Node, g, node_info("n1", T0)).await.unwrap();
        assert_eq!(mapper.len(UnitKind::Node, g).await, 1);
        mapper.release(claim).await;
        assert_eq!(mapper.len(UnitKind::Node, g).await, 0);
    }

    #[tokio::test]
    async fn test_release_after_completion_keeps_entry_removed() {
        let clock = Arc::new(ManualClock::new(T0));
        let mapper = mapper(clock.clone());
        let g = Granularity::OneHour;

        mapper.add_model_info(UnitKind::Node, g, node_info("n1", T0)).await;
        clock.advance(TIMEOUT as i64 + 1);
        let now = T0 + TIMEOUT as i64 + 1;
        let claim = mapper
            .try_claim(UnitKind::Node, g, node_info("n1", now))
            .await
            .unwrap();

        // The displaced job completes before the publish fails
        assert!(mapper.remove_model_info(UnitKind::Node, g, "c1/n1").await.is_some());
        mapper.release(claim).await;
        assert!(!mapper.is_modeling(UnitKind::Node, g, "c1/n1").await);
    }

    #[tokio::test]
    async fn test_release_leaves_later_claim_alone() {
        let clock = Arc::new(ManualClock::new(T0));
        let mapper = mapper(clock.clone());
        let g = Granularity::OneHour;

        let first = mapper
            .try_claim(UnitKind::Node, g, node_info("n1", T0))
            .await
            .unwrap();
        mapper.remove_model_info(UnitKind::Node, g, "c1/n1").await;
        clock.advance(30);
        mapper
            .try_claim(UnitKind::Node, g, node_info("n1", T0 + 30))
            .await
            .unwrap();

        mapper.release(first).await;
        let info = mapper.get_model_info(UnitKind::Node, g, "c1/n1").await.unwrap();
        assert_eq!(info.timestamp, T0 + 30);
    }

    #[tokio::test]
    async fn test_concurrent_claims_yield_one_winner() {
        let clock = Arc::new(ManualClock::new(T0));
        let mapper = Arc::new(mapper(clock));
        let g = Granularity::OneHour;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let mapper = mapper.clone();
            handles.push(tokio::spawn(async move {
                mapper
                    .try_claim(UnitKind::Node, g, node_info("n1", T0))
                    .await
                    .is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
