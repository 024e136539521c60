//! Per-(user, post) locks serializing vote read-modify-write sequences.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type VoteKey = (String, String);

/// Lock table keyed by (user id, post id). Distinct keys never contend.
#[derive(Default)]
pub struct VoteLocks {
    locks: DashMap<VoteKey, Arc<Mutex<()>>>,
}

/// Held while a vote is being applied. Unused entries are removed on drop.
pub struct VoteLockGuard<'a> {
    locks: &'a VoteLocks,
    key: VoteKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl VoteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, user_id: &str, post_id: &str) -> VoteLockGuard<'_> {
        let key = (user_id.to_string(), post_id.to_string());
        let mutex = self.locks.entry(key.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;

        VoteLockGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for VoteLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the table's own reference left means nobody is waiting
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(VoteLocks::new());
        let first = locks.lock("u1", "p1").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("u1", "p1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = VoteLocks::new();
        let _a = locks.lock("u1", "p1").await;
        let _b = locks.lock("u2", "p1").await;
        let _c = locks.lock("u1", "p2").await;
        assert_eq!(locks.len(), 3);
    }
}
