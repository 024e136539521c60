//! Subreddit and subscription API endpoints.

use axum::extract::{Path, State};

use super::{success, ApiResult};
use crate::auth::{self, MaybeCaller};
use crate::errors::AppError;
use crate::models::{CreateSubredditRequest, Subreddit, SubredditDetails, SubscriptionRequest};
use crate::validation::ValidJson;
use crate::AppState;

/// POST /api/subreddit - Create a subreddit; the creator is subscribed to it.
pub async fn create_subreddit(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    ValidJson(request): ValidJson<CreateSubredditRequest>,
) -> ApiResult<Subreddit> {
    let caller = auth::require(caller)?;
    let repo = state.store.acquire().await?;

    if repo.find_subreddit_by_name(&request.name).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "Subreddit {} already exists",
            request.name
        )));
    }

    let subreddit = repo.create_subreddit(&request.name, &caller.user_id).await?;
    tracing::info!("Subreddit {} created by {}", subreddit.name, caller.user_id);
    success(subreddit)
}

/// GET /api/subreddit/{name} - A subreddit with its member count and the caller's subscription.
pub async fn get_subreddit(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path(name): Path<String>,
) -> ApiResult<SubredditDetails> {
    let repo = state.store.acquire().await?;

    let Some(subreddit) = repo.find_subreddit_by_name(&name).await? else {
        return Err(AppError::NotFound(format!("Subreddit {} not found", name)));
    };

    let member_count = repo.count_subscribers(&subreddit.id).await?;
    let is_subscribed = match &caller {
        Some(caller) => repo.is_subscribed(&caller.user_id, &subreddit.id).await?,
        None => false,
    };

    success(SubredditDetails {
        subreddit,
        member_count,
        is_subscribed,
    })
}

/// POST /api/subreddit/subscribe - Subscribe the caller to a subreddit.
pub async fn subscribe(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    ValidJson(request): ValidJson<SubscriptionRequest>,
) -> ApiResult<String> {
    let caller = auth::require(caller)?;
    let repo = state.store.acquire().await?;

    if repo.get_subreddit(&request.subreddit_id).await?.is_none() {
        return Err(AppError::NotFound(format!(
            "Subreddit {} not found",
            request.subreddit_id
        )));
    }

    if repo
        .is_subscribed(&caller.user_id, &request.subreddit_id)
        .await?
    {
        return Err(AppError::BadRequest(
            "Already subscribed to this subreddit".to_string(),
        ));
    }

    repo.subscribe(&caller.user_id, &request.subreddit_id)
        .await
        .map_err(|err| match err {
            AppError::Conflict(_) => {
                AppError::BadRequest("Already subscribed to this subreddit".to_string())
            }
            other => other,
        })?;

    success(request.subreddit_id)
}

/// POST /api/subreddit/unsubscribe - Remove the caller's subscription.
pub async fn unsubscribe(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    ValidJson(request): ValidJson<SubscriptionRequest>,
) -> ApiResult<String> {
    let caller = auth::require(caller)?;
    let repo = state.store.acquire().await?;

    if !repo
        .is_subscribed(&caller.user_id, &request.subreddit_id)
        .await?
    {
        return Err(AppError::BadRequest("Not yet subscribed".to_string()));
    }

    let subreddit = repo.get_subreddit(&request.subreddit_id).await?;
    if subreddit.and_then(|s| s.creator_id).as_deref() == Some(caller.user_id.as_str()) {
        return Err(AppError::BadRequest(
            "Cannot unsubscribe from own subreddit".to_string(),
        ));
    }

    repo.unsubscribe(&caller.user_id, &request.subreddit_id)
        .await?;

    success(request.subreddit_id)
}
