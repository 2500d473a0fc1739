//! Seen-value store
//!
//! Records every broadcast value this node has observed. The store is the
//! single point that decides whether a value is new and therefore has to be
//! fanned out.

use std::collections::HashSet;
use tokio::sync::RwLock;

/// Deduplication store for broadcast values.
///
/// Values are never removed. Check and insert happen under one write lock,
/// so of any number of concurrent `observe` calls for the same value exactly
/// one reports it as new.
#[derive(Debug, Default)]
pub struct SeenSet {
    values: RwLock<HashSet<i64>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value`, returning `true` if it had not been seen before.
    pub async fn observe(&self, value: i64) -> bool {
        self.values.write().await.insert(value)
    }

    /// All values seen so far, in no particular order.
    pub async fn snapshot(&self) -> Vec<i64> {
        self.values.read().await.iter().copied().collect()
    }

    pub async fn contains(&self, value: i64) -> bool {
        self.values.read().await.contains(&value)
    }

    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_observe_is_idempotent() {
        let seen = SeenSet::new();

        assert!(seen.observe(5).await);
        assert!(!seen.observe(5).await);

        assert_eq!(seen.snapshot().await, vec![5]);
        assert_eq!(seen.len().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_holds_every_value() {
        let seen = SeenSet::new();
        assert!(seen.is_empty().await);

        for value in [7, 5, -3, 7] {
            seen.observe(value).await;
        }

        let mut values = seen.snapshot().await;
        values.sort_unstable();
        assert_eq!(values, vec![-3, 5, 7]);
        assert!(seen.contains(-3).await);
        assert!(!seen.contains(4).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_observe_race() {
        let seen = Arc::new(SeenSet::new());

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let seen = seen.clone();
                tokio::spawn(async move { seen.observe(11).await })
            })
            .collect();

        let mut new_count = 0;
        for handle in handles {
            if handle.await.unwrap() {
                new_count += 1;
            }
        }

        assert_eq!(new_count, 1);
        assert_eq!(seen.len().await, 1);
    }
}
