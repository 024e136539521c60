//! Vote aggregation.
//!
//! Applying a vote is a toggle-or-switch on the caller's existing vote:
//!
//! | current | requested | result                      |
//! |---------|-----------|-----------------------------|
//! | none    | X         | vote X created              |
//! | X       | X         | vote deleted (retracted)    |
//! | X       | Y         | vote switched to Y          |
//!
//! After the write the post's votes are re-read and folded into a signed
//! count. Posts whose count is above the configured threshold get a snapshot
//! written to the cache store by a detached task.

mod locks;
mod store;

pub use locks::VoteLocks;
pub use store::VoteStore;

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::auth::Caller;
use crate::cache::CacheStore;
use crate::errors::AppError;
use crate::models::{vote_count, CachedPost, VoteRequest, VoteType};

/// Persisted effect of a vote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Create(VoteType),
    Update(VoteType),
    Delete,
}

impl Transition {
    /// Vote the caller holds after the transition.
    pub fn resulting_vote(&self) -> Option<VoteType> {
        match self {
            Transition::Create(vote_type) | Transition::Update(vote_type) => Some(*vote_type),
            Transition::Delete => None,
        }
    }
}

/// Decide the transition from the caller's current vote and the requested one.
pub fn transition(current: Option<VoteType>, requested: VoteType) -> Transition {
    match current {
        None => Transition::Create(requested),
        Some(existing) if existing == requested => Transition::Delete,
        Some(_) => Transition::Update(requested),
    }
}

/// Whether the request left a vote in place or removed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteStatus {
    Ok,
    Deleted,
}

/// Result of [`VoteAggregator::apply_vote`].
#[derive(Debug)]
pub struct VoteOutcome {
    pub status: VoteStatus,
    pub vote_count: i64,
    pub current_vote: Option<VoteType>,
    /// Detached cache write, if the post crossed the threshold. Dropping it
    /// leaves the write running.
    pub cache_write: Option<JoinHandle<()>>,
}

/// Applies votes for one request scope.
pub struct VoteAggregator {
    store: Arc<dyn VoteStore>,
    cache: Arc<dyn CacheStore>,
    locks: Arc<VoteLocks>,
    cache_after_upvotes: i64,
}

impl VoteAggregator {
    pub fn new(
        store: Arc<dyn VoteStore>,
        cache: Arc<dyn CacheStore>,
        locks: Arc<VoteLocks>,
        cache_after_upvotes: i64,
    ) -> Self {
        Self {
            store,
            cache,
            locks,
            cache_after_upvotes,
        }
    }

    /// Apply `request` on behalf of `caller`.
    pub async fn apply_vote(
        &self,
        caller: Option<&Caller>,
        request: &VoteRequest,
    ) -> Result<VoteOutcome, AppError> {
        let caller =
            caller.ok_or_else(|| AppError::Unauthorized("Unauthorized".to_string()))?;
        let user_id = caller.user_id.as_str();
        let post_id = request.post_id.as_str();

        let guard = self.locks.lock(user_id, post_id).await;

        if self.store.find_post_with_votes(post_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Post {} not found", post_id)));
        }

        let applied = match self.persist(user_id, post_id, request.vote_type).await {
            Err(AppError::Conflict(reason)) => {
                tracing::warn!(
                    user_id,
                    post_id,
                    "Vote write lost a race ({}), retrying once",
                    reason
                );
                self.persist(user_id, post_id, request.vote_type)
                    .await
                    .map_err(|err| match err {
                        AppError::Conflict(reason) => AppError::Internal(format!(
                            "Could not register vote after retry: {}",
                            reason
                        )),
                        other => other,
                    })?
            }
            other => other?,
        };

        let post = self
            .store
            .find_post_with_votes(post_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Post {} not found", post_id)))?;
        drop(guard);

        let count = vote_count(&post.votes);
        let current_vote = applied.resulting_vote();

        tracing::debug!(user_id, post_id, ?applied, count, "Vote applied");

        let cache_write = (count > self.cache_after_upvotes)
            .then(|| self.spawn_cache_write(CachedPost::snapshot(&post, current_vote)));

        Ok(VoteOutcome {
            status: match applied {
                Transition::Delete => VoteStatus::Deleted,
                _ => VoteStatus::Ok,
            },
            vote_count: count,
            current_vote,
            cache_write,
        })
    }

    /// Read the current vote, decide the transition and write it.
    async fn persist(
        &self,
        user_id: &str,
        post_id: &str,
        requested: VoteType,
    ) -> Result<Transition, AppError> {
        let current = self.store.find_vote(user_id, post_id).await?;
        let next = transition(current, requested);

        match next {
            Transition::Create(vote_type) => {
                self.store.create_vote(user_id, post_id, vote_type).await?
            }
            Transition::Update(vote_type) => {
                self.store
                    .update_vote_type(user_id, post_id, vote_type)
                    .await?
            }
            Transition::Delete => self.store.delete_vote(user_id, post_id).await?,
        }

        Ok(next)
    }

    fn spawn_cache_write(&self, snapshot: CachedPost) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            let key = snapshot.key();
            match cache.write_hash(&key, &snapshot.fields()).await {
                Ok(()) => tracing::debug!("Cached post snapshot {}", key),
                Err(err) => tracing::warn!("Failed to cache post snapshot {}: {}", key, err),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::cache::MemoryCache;
    use crate::models::{PostWithVotes, Vote};

    /// In-memory vote store with call counting and injectable conflicts.
    #[derive(Default)]
    struct MemoryVoteStore {
        posts: HashSet<String>,
        votes: Mutex<HashMap<(String, String), VoteType>>,
        calls: AtomicUsize,
        conflicts_to_inject: AtomicUsize,
    }

    impl MemoryVoteStore {
        fn with_post(post_id: &str) -> Self {
            Self {
                posts: HashSet::from([post_id.to_string()]),
                ..Default::default()
            }
        }

        fn vote_of(&self, user_id: &str, post_id: &str) -> Option<VoteType> {
            self.votes
                .lock()
                .unwrap()
                .get(&(user_id.to_string(), post_id.to_string()))
                .copied()
        }

        fn row_count(&self) -> usize {
            self.votes.lock().unwrap().len()
        }

        fn seed(&self, user_id: &str, post_id: &str, vote_type: VoteType) {
            self.votes
                .lock()
                .unwrap()
                .insert((user_id.to_string(), post_id.to_string()), vote_type);
        }

        fn take_conflict(&self) -> bool {
            self.conflicts_to_inject
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl VoteStore for MemoryVoteStore {
        async fn find_vote(
            &self,
            user_id: &str,
            post_id: &str,
        ) -> Result<Option<VoteType>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let found = self.vote_of(user_id, post_id);
            // Give concurrent requests a chance to interleave
            tokio::task::yield_now().await;
            Ok(found)
        }

        async fn create_vote(
            &self,
            user_id: &str,
            post_id: &str,
            vote_type: VoteType,
        ) -> Result<(), AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.take_conflict() {
                // Simulate another process inserting first
                self.seed(user_id, post_id, VoteType::Down);
                return Err(AppError::Conflict("duplicate vote".into()));
            }
            let mut votes = self.votes.lock().unwrap();
            let key = (user_id.to_string(), post_id.to_string());
            if votes.contains_key(&key) {
                return Err(AppError::Conflict("duplicate vote".into()));
            }
            votes.insert(key, vote_type);
            Ok(())
        }

        async fn update_vote_type(
            &self,
            user_id: &str,
            post_id: &str,
            vote_type: VoteType,
        ) -> Result<(), AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut votes = self.votes.lock().unwrap();
            match votes.get_mut(&(user_id.to_string(), post_id.to_string())) {
                Some(existing) => {
                    *existing = vote_type;
                    Ok(())
                }
                None => Err(AppError::Conflict("vote vanished".into())),
            }
        }

        async fn delete_vote(&self, user_id: &str, post_id: &str) -> Result<(), AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut votes = self.votes.lock().unwrap();
            match votes.remove(&(user_id.to_string(), post_id.to_string())) {
                Some(_) => Ok(()),
                None => Err(AppError::Conflict("vote vanished".into())),
            }
        }

        async fn find_post_with_votes(
            &self,
            post_id: &str,
        ) -> Result<Option<PostWithVotes>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.posts.contains(post_id) {
                return Ok(None);
            }
            let votes = self
                .votes
                .lock()
                .unwrap()
                .iter()
                .filter(|((_, p), _)| p == post_id)
                .map(|((u, p), t)| Vote {
                    user_id: u.clone(),
                    post_id: p.clone(),
                    vote_type: *t,
                })
                .collect();
            Ok(Some(PostWithVotes {
                id: post_id.to_string(),
                title: "A post".into(),
                content: serde_json::json!({"blocks": []}),
                author_username: Some("author".into()),
                created_at: "2024-01-01T00:00:00.000000Z".into(),
                votes,
            }))
        }
    }

    struct FailingCache {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl CacheStore for FailingCache {
        async fn write_hash(
            &self,
            _key: &str,
            _fields: &[(&'static str, String)],
        ) -> Result<(), AppError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Cache("connection refused".into()))
        }
    }

    /// Cache that counts writes on top of storing them.
    #[derive(Default)]
    struct CountingCache {
        inner: MemoryCache,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl CacheStore for CountingCache {
        async fn write_hash(
            &self,
            key: &str,
            fields: &[(&'static str, String)],
        ) -> Result<(), AppError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.write_hash(key, fields).await
        }
    }

    struct Fixture {
        store: Arc<MemoryVoteStore>,
        cache: Arc<CountingCache>,
        aggregator: Arc<VoteAggregator>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryVoteStore::with_post("p1"));
        let cache = Arc::new(CountingCache::default());
        let aggregator = Arc::new(VoteAggregator::new(
            store.clone(),
            cache.clone(),
            Arc::new(VoteLocks::new()),
            1,
        ));
        Fixture {
            store,
            cache,
            aggregator,
        }
    }

    fn caller(user_id: &str) -> Caller {
        Caller {
            user_id: user_id.to_string(),
            username: None,
        }
    }

    fn request(vote_type: VoteType) -> VoteRequest {
        VoteRequest {
            post_id: "p1".into(),
            vote_type,
        }
    }

    async fn vote(f: &Fixture, user_id: &str, vote_type: VoteType) -> VoteOutcome {
        let mut outcome = f
            .aggregator
            .apply_vote(Some(&caller(user_id)), &request(vote_type))
            .await
            .unwrap();
        if let Some(handle) = outcome.cache_write.take() {
            handle.await.unwrap();
        }
        outcome
    }

    #[test]
    fn test_transition_table() {
        use Transition::*;
        use VoteType::*;

        assert_eq!(transition(None, Up), Create(Up));
        assert_eq!(transition(None, Down), Create(Down));
        assert_eq!(transition(Some(Up), Up), Delete);
        assert_eq!(transition(Some(Up), Down), Update(Down));
        assert_eq!(transition(Some(Down), Down), Delete);
        assert_eq!(transition(Some(Down), Up), Update(Up));
    }

    #[tokio::test]
    async fn test_same_vote_twice_retracts() {
        for vote_type in [VoteType::Up, VoteType::Down] {
            let f = fixture();
            let first = vote(&f, "alice", vote_type).await;
            assert_eq!(first.status, VoteStatus::Ok);
            assert_eq!(first.current_vote, Some(vote_type));

            let second = vote(&f, "alice", vote_type).await;
            assert_eq!(second.status, VoteStatus::Deleted);
            assert_eq!(second.current_vote, None);
            assert_eq!(second.vote_count, 0);
            assert_eq!(f.store.row_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_opposite_vote_switches() {
        let f = fixture();
        vote(&f, "alice", VoteType::Up).await;
        let outcome = vote(&f, "alice", VoteType::Down).await;

        assert_eq!(outcome.status, VoteStatus::Ok);
        assert_eq!(outcome.vote_count, -1);
        assert_eq!(f.store.row_count(), 1);
        assert_eq!(f.store.vote_of("alice", "p1"), Some(VoteType::Down));
    }

    #[tokio::test]
    async fn test_scenario_cache_written_once_above_threshold() {
        let f = fixture();

        let a = vote(&f, "alice", VoteType::Up).await;
        assert_eq!(a.status, VoteStatus::Ok);
        assert_eq!(a.vote_count, 1);
        assert_eq!(f.cache.writes.load(Ordering::SeqCst), 0);

        let b = vote(&f, "bob", VoteType::Up).await;
        assert_eq!(b.status, VoteStatus::Ok);
        assert_eq!(b.vote_count, 2);
        assert_eq!(f.cache.writes.load(Ordering::SeqCst), 1);
        let cached = f.cache.inner.get("post:p1").unwrap();
        assert_eq!(cached["currentVote"], "UP");
        assert_eq!(cached["authorUsername"], "author");
        assert_eq!(cached["id"], "p1");

        let again = vote(&f, "alice", VoteType::Up).await;
        assert_eq!(again.status, VoteStatus::Deleted);
        assert_eq!(again.vote_count, 1);
        assert_eq!(f.cache.writes.load(Ordering::SeqCst), 1);
        // Dropping below the threshold leaves the snapshot in place
        assert!(f.cache.inner.get("post:p1").is_some());
    }

    #[tokio::test]
    async fn test_retraction_above_threshold_writes_empty_current_vote() {
        let f = fixture();
        f.store.seed("x", "p1", VoteType::Up);
        f.store.seed("y", "p1", VoteType::Up);

        let cast = vote(&f, "alice", VoteType::Up).await;
        assert_eq!(cast.vote_count, 3);
        assert_eq!(f.cache.inner.get("post:p1").unwrap()["currentVote"], "UP");

        let retracted = vote(&f, "alice", VoteType::Up).await;
        assert_eq!(retracted.status, VoteStatus::Deleted);
        assert_eq!(retracted.vote_count, 2);
        assert_eq!(f.cache.writes.load(Ordering::SeqCst), 2);
        let cached = f.cache.inner.get("post:p1").unwrap();
        assert_eq!(cached["currentVote"], "");
        assert_eq!(cached["title"], "A post");
    }

    #[tokio::test]
    async fn test_no_cache_write_at_or_below_threshold() {
        let f = fixture();
        f.store.seed("x", "p1", VoteType::Up);
        f.store.seed("y", "p1", VoteType::Down);

        let outcome = vote(&f, "alice", VoteType::Up).await;
        assert_eq!(outcome.vote_count, 1);
        assert!(outcome.cache_write.is_none());

        let outcome = vote(&f, "bob", VoteType::Down).await;
        assert_eq!(outcome.vote_count, 0);
        assert_eq!(f.cache.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_failure_does_not_fail_vote() {
        let store = Arc::new(MemoryVoteStore::with_post("p1"));
        store.seed("x", "p1", VoteType::Up);
        store.seed("y", "p1", VoteType::Up);
        let cache = Arc::new(FailingCache {
            attempts: AtomicUsize::new(0),
        });
        let aggregator =
            VoteAggregator::new(store.clone(), cache.clone(), Arc::new(VoteLocks::new()), 1);

        let outcome = aggregator
            .apply_vote(Some(&caller("alice")), &request(VoteType::Up))
            .await
            .unwrap();

        assert_eq!(outcome.status, VoteStatus::Ok);
        assert_eq!(outcome.vote_count, 3);
        outcome.cache_write.unwrap().await.unwrap();
        assert_eq!(cache.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(store.vote_of("alice", "p1"), Some(VoteType::Up));
    }

    #[tokio::test]
    async fn test_unauthenticated_never_touches_store() {
        let f = fixture();
        let err = f
            .aggregator
            .apply_vote(None, &request(VoteType::Up))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Unauthorized(_)));
        assert_eq!(f.store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_post_is_not_found_without_mutation() {
        let f = fixture();
        let err = f
            .aggregator
            .apply_vote(
                Some(&caller("alice")),
                &VoteRequest {
                    post_id: "nope".into(),
                    vote_type: VoteType::Up,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(f.store.row_count(), 0);
    }

    #[tokio::test]
    async fn test_lost_race_is_retried_once() {
        let f = fixture();
        f.store.conflicts_to_inject.store(1, Ordering::SeqCst);

        // The injected conflict leaves a DOWN vote behind; the retry re-reads it
        // and switches it to the requested UP.
        let outcome = vote(&f, "alice", VoteType::Up).await;
        assert_eq!(outcome.status, VoteStatus::Ok);
        assert_eq!(f.store.vote_of("alice", "p1"), Some(VoteType::Up));
        assert_eq!(f.store.row_count(), 1);
    }

    #[tokio::test]
    async fn test_second_conflict_surfaces_as_internal_error() {
        // Every read sees no vote and every insert collides
        struct AlwaysConflict(Arc<MemoryVoteStore>);

        #[async_trait]
        impl VoteStore for AlwaysConflict {
            async fn find_vote(&self, _: &str, _: &str) -> Result<Option<VoteType>, AppError> {
                Ok(None)
            }
            async fn create_vote(&self, _: &str, _: &str, _: VoteType) -> Result<(), AppError> {
                Err(AppError::Conflict("duplicate vote".into()))
            }
            async fn update_vote_type(
                &self,
                _: &str,
                _: &str,
                _: VoteType,
            ) -> Result<(), AppError> {
                unreachable!()
            }
            async fn delete_vote(&self, _: &str, _: &str) -> Result<(), AppError> {
                unreachable!()
            }
            async fn find_post_with_votes(
                &self,
                post_id: &str,
            ) -> Result<Option<PostWithVotes>, AppError> {
                self.0.find_post_with_votes(post_id).await
            }
        }

        let aggregator = VoteAggregator::new(
            Arc::new(AlwaysConflict(Arc::new(MemoryVoteStore::with_post("p1")))),
            Arc::new(MemoryCache::new()),
            Arc::new(VoteLocks::new()),
            1,
        );
        let err = aggregator
            .apply_vote(Some(&caller("alice")), &request(VoteType::Up))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn test_concurrent_same_user_votes_are_serialized() {
        let f = fixture();

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let aggregator = Arc::clone(&f.aggregator);
                tokio::spawn(async move {
                    aggregator
                        .apply_vote(Some(&caller("alice")), &request(VoteType::Up))
                        .await
                        .map(|o| o.status)
                })
            })
            .collect();

        let mut statuses = Vec::new();
        for task in tasks {
            statuses.push(task.await.unwrap().unwrap());
        }
        statuses.sort_by_key(|s| matches!(s, VoteStatus::Deleted));

        // One request created the vote, the other retracted it
        assert_eq!(statuses, vec![VoteStatus::Ok, VoteStatus::Deleted]);
        assert_eq!(f.store.row_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_votes_from_different_users() {
        let f = fixture();

        let tasks: Vec<_> = [("alice", VoteType::Up), ("bob", VoteType::Down), ("carol", VoteType::Up)]
            .into_iter()
            .map(|(user, vote_type)| {
                let aggregator = Arc::clone(&f.aggregator);
                tokio::spawn(async move {
                    aggregator
                        .apply_vote(Some(&caller(user)), &request(vote_type))
                        .await
                        .map(|o| o.status)
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), VoteStatus::Ok);
        }

        assert_eq!(f.store.vote_of("alice", "p1"), Some(VoteType::Up));
        assert_eq!(f.store.vote_of("bob", "p1"), Some(VoteType::Down));
        assert_eq!(f.store.vote_of("carol", "p1"), Some(VoteType::Up));
        assert_eq!(f.store.row_count(), 3);
    }
}
