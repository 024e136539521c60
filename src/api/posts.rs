//! Post API endpoints.

use axum::extract::{Path, Query, State};

use super::{success, ApiResult};
use crate::auth::{self, MaybeCaller};
use crate::errors::AppError;
use crate::models::{CreatePostRequest, FeedQuery, FeedRequest, Post, PostSummary};
use crate::validation::ValidJson;
use crate::AppState;

/// POST /api/subreddit/post/create - Create a post in a subreddit the caller follows.
pub async fn create_post(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    ValidJson(request): ValidJson<CreatePostRequest>,
) -> ApiResult<Post> {
    let caller = auth::require(caller)?;
    let repo = state.store.acquire().await?;

    if repo.get_subreddit(&request.subreddit_id).await?.is_none() {
        return Err(AppError::NotFound(format!(
            "Subreddit {} not found",
            request.subreddit_id
        )));
    }

    if !repo
        .is_subscribed(&caller.user_id, &request.subreddit_id)
        .await?
    {
        return Err(AppError::Unauthorized("Subscribe to post".to_string()));
    }

    let post = repo.create_post(&caller.user_id, &request).await?;
    success(post)
}

/// GET /api/posts - List a page of the feed.
pub async fn list_posts(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Query(query): Query<FeedQuery>,
) -> ApiResult<Vec<PostSummary>> {
    let request = FeedRequest::validate(&query, state.config.page_size)?;
    let repo = state.store.acquire().await?;
    let viewer = caller.as_ref().map(|c| c.user_id.as_str());

    let posts = repo.list_posts(&request, viewer).await?;
    success(posts)
}

/// GET /api/posts/{id} - Get a single post with its vote count.
pub async fn get_post(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path(id): Path<String>,
) -> ApiResult<PostSummary> {
    let repo = state.store.acquire().await?;
    let viewer = caller.as_ref().map(|c| c.user_id.as_str());

    match repo.get_post_summary(&id, viewer).await? {
        Some(post) => success(post),
        None => Err(AppError::NotFound(format!("Post {} not found", id))),
    }
}
