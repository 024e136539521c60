//! Persistence contract used by the vote aggregator.

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::{PostWithVotes, VoteType};

/// Vote persistence. Implementations must keep at most one vote per (user, post);
/// a write that would break that rule fails with [`AppError::Conflict`], as does an
/// update or delete whose row vanished in the meantime.
#[async_trait]
pub trait VoteStore: Send + Sync {
    async fn find_vote(&self, user_id: &str, post_id: &str) -> Result<Option<VoteType>, AppError>;

    async fn create_vote(
        &self,
        user_id: &str,
        post_id: &str,
        vote_type: VoteType,
    ) -> Result<(), AppError>;

    async fn update_vote_type(
        &self,
        user_id: &str,
        post_id: &str,
        vote_type: VoteType,
    ) -> Result<(), AppError>;

    async fn delete_vote(&self, user_id: &str, post_id: &str) -> Result<(), AppError>;

    async fn find_post_with_votes(&self, post_id: &str)
        -> Result<Option<PostWithVotes>, AppError>;
}
