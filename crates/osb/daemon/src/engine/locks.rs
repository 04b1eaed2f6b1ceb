//! Per-instance mutual exclusion
//!
//! The existence check, the pending-operation check and the registration of a
//! new operation for one instance id happen while holding that id's lock, so
//! two concurrent requests for the same id cannot both pass the gate.
//! Distinct ids never contend.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Lock table keyed by instance id
#[derive(Debug, Default)]
pub struct InstanceLocks {
    locks: Arc<LockMap>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `instance_id`
    pub async fn acquire(&self, instance_id: &str) -> InstanceGuard {
        let mutex = self
            .locks
            .entry(instance_id.to_string())
            .or_default()
            .clone();
        let guard = mutex.lock_owned().await;

        InstanceGuard {
            instance_id: instance_id.to_string(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Number of ids with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held lock on one instance id; the table entry is dropped with the last
/// holder.
#[derive(Debug)]
pub struct InstanceGuard {
    instance_id: String,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.instance_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_id_is_serialized() {
        let locks = Arc::new(InstanceLocks::new());
        let guard = locks.acquire("i1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("i1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_distinct_ids_do_not_contend() {
        let locks = InstanceLocks::new();
        let _a = locks.acquire("i1").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("i2")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_entries_are_released() {
        let locks = InstanceLocks::new();
        {
            let _guard = locks.acquire("i1").await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }
}
