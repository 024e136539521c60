//! Vote API endpoint.

use std::sync::Arc;

use axum::extract::State;
use serde::Serialize;

use super::{success, ApiResult};
use crate::auth::{self, MaybeCaller};
use crate::models::{VoteRequest, VoteType};
use crate::validation::ValidJson;
use crate::votes::{VoteAggregator, VoteStatus};
use crate::AppState;

/// Response body of a successful vote.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResult {
    pub status: VoteStatus,
    pub vote_count: i64,
    pub current_vote: Option<VoteType>,
}

/// PATCH /api/subreddit/post/vote - Cast, switch or retract a vote on a post.
pub async fn vote_post(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    ValidJson(request): ValidJson<VoteRequest>,
) -> ApiResult<VoteResult> {
    let caller = auth::require(caller)?;

    let store = state.store.acquire().await?;
    let aggregator = VoteAggregator::new(
        Arc::new(store),
        Arc::clone(&state.cache),
        Arc::clone(&state.vote_locks),
        state.config.cache_after_upvotes,
    );

    let outcome = aggregator.apply_vote(Some(&caller), &request).await?;

    // The cache write keeps running after the handle is dropped
    if outcome.cache_write.is_some() {
        tracing::debug!("Snapshot of post {} scheduled", request.post_id);
    }

    success(VoteResult {
        status: outcome.status,
        vote_count: outcome.vote_count,
        current_vote: outcome.current_vote,
    })
}
