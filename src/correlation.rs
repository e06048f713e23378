//! Correlation caches for request/response and request/ack.
//!
//! A publisher inserts the envelope's unique id and holds the returned
//! receiver; a delivery worker later completes the entry when the matching
//! response or ack arrives. Every entry carries a per-entry eviction timer:
//! when the time-to-live elapses first, the entry is removed and its future
//! failed with the cache's timeout error. Fulfilment and eviction race on
//! `DashMap::remove`, so exactly one side ever completes a future and no
//! entry outlives its timeout.
//!
//! Arrivals for ids with no live entry are deliberately a no-op: the caller
//! may have timed out or never waited at all.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::error::{BridgeError, BridgeResult};

/// Receiver half handed to the waiting caller.
pub(crate) type PendingReceiver<T> = oneshot::Receiver<BridgeResult<T>>;

/// Time-bounded map from message unique id to a pending completion.
pub(crate) struct CorrelationCache<T: Send + 'static> {
    pending: Arc<DashMap<Uuid, oneshot::Sender<BridgeResult<T>>>>,
    ttl: Duration,
    timeout_error: fn() -> BridgeError,
}

impl<T: Send + 'static> CorrelationCache<T> {
    pub fn new(ttl: Duration, timeout_error: fn() -> BridgeError) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            ttl,
            timeout_error,
        }
    }

    /// Registers a pending correlation for `id` and returns the future half.
    ///
    /// Spawns the eviction timer immediately; the clock starts at insertion.
    pub fn insert(&self, id: Uuid) -> PendingReceiver<T> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let pending = self.pending.clone();
        let timeout_error = self.timeout_error;
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some((_, tx)) = pending.remove(&id) {
                debug!(%id, "correlation evicted after timeout");
                let _ = tx.send(Err(timeout_error()));
            }
        });

        rx
    }

    /// Completes the pending correlation for `id`, if one is still live.
    /// Returns false for unmatched arrivals, which are not an error.
    pub fn complete(&self, id: Uuid, value: T) -> bool {
        match self.pending.remove(&id) {
            Some((_, tx)) => {
                let _ = tx.send(Ok(value));
                true
            }
            None => false,
        }
    }

    /// Drops the pending correlation for `id` without completing it. Used
    /// when the publish that created it failed before anything could arrive.
    pub fn discard(&self, id: Uuid) {
        self.pending.remove(&id);
    }

    /// Fails every pending correlation. Called on unload so in-flight
    /// callers observe an error instead of hanging forever.
    pub fn fail_all(&self, make_error: impl Fn() -> BridgeError) {
        let ids: Vec<Uuid> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(make_error()));
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_complete_resolves_pending_future() {
        let cache: CorrelationCache<u32> =
            CorrelationCache::new(Duration::from_secs(5), || BridgeError::NoResponse);
        let id = Uuid::new_v4();
        let rx = cache.insert(id);

        assert!(cache.complete(id, 7));
        assert_eq!(rx.await.unwrap().unwrap(), 7);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_eviction_fails_future_after_ttl() {
        let cache: CorrelationCache<u32> =
            CorrelationCache::new(Duration::from_millis(100), || BridgeError::NoAck);
        let started = Instant::now();
        let rx = cache.insert(Uuid::new_v4());

        let result = rx.await.unwrap();
        assert!(matches!(result, Err(BridgeError::NoAck)));
        assert!(started.elapsed() >= Duration::from_millis(90));
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_arrival_is_noop() {
        let cache: CorrelationCache<u32> =
            CorrelationCache::new(Duration::from_secs(5), || BridgeError::NoResponse);
        assert!(!cache.complete(Uuid::new_v4(), 1));
    }

    #[tokio::test]
    async fn test_completion_wins_over_eviction_exactly_once() {
        let cache: CorrelationCache<u32> =
            CorrelationCache::new(Duration::from_millis(50), || BridgeError::NoResponse);
        let id = Uuid::new_v4();
        let rx = cache.insert(id);

        assert!(cache.complete(id, 1));
        // The eviction timer fires later but finds nothing to evict.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(rx.await.unwrap().unwrap(), 1);
        assert!(!cache.complete(id, 2));
    }

    #[tokio::test]
    async fn test_fail_all_releases_every_pending_entry() {
        let cache: CorrelationCache<u32> =
            CorrelationCache::new(Duration::from_secs(30), || BridgeError::NoResponse);
        let rx1 = cache.insert(Uuid::new_v4());
        let rx2 = cache.insert(Uuid::new_v4());

        cache.fail_all(|| BridgeError::ShuttingDown);
        assert!(matches!(rx1.await.unwrap(), Err(BridgeError::ShuttingDown)));
        assert!(matches!(rx2.await.unwrap(), Err(BridgeError::ShuttingDown)));
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_discard_drops_sender_without_completing() {
        let cache: CorrelationCache<u32> =
            CorrelationCache::new(Duration::from_millis(50), || BridgeError::NoResponse);
        let id = Uuid::new_v4();
        let rx = cache.insert(id);
        cache.discard(id);

        // Sender dropped: the receiver errors instead of timing out.
        assert!(rx.await.is_err());
    }
}
