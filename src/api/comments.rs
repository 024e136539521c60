//! Comment API endpoints.

use axum::extract::{Path, State};

use super::{success, ApiResult};
use crate::auth::{self, MaybeCaller};
use crate::errors::AppError;
use crate::models::{Comment, CommentThread, CreateCommentRequest};
use crate::validation::ValidJson;
use crate::AppState;

/// PATCH /api/subreddit/post/comment - Comment on a post or reply to a comment.
pub async fn create_comment(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    ValidJson(mut request): ValidJson<CreateCommentRequest>,
) -> ApiResult<Comment> {
    let caller = auth::require(caller)?;
    let repo = state.store.acquire().await?;

    if !repo.post_exists(&request.post_id).await? {
        return Err(AppError::NotFound(format!(
            "Post {} not found",
            request.post_id
        )));
    }

    if let Some(reply_to_id) = request.reply_to_id.clone() {
        match repo.get_comment(&reply_to_id).await? {
            // Threads are one level deep: a reply to a reply joins its parent's thread
            Some(parent) if parent.post_id == request.post_id => {
                if let Some(root_id) = parent.reply_to_id {
                    request.reply_to_id = Some(root_id);
                }
            }
            Some(_) => {
                return Err(AppError::BadRequest(
                    "Cannot reply to a comment on another post".to_string(),
                ))
            }
            None => {
                return Err(AppError::NotFound(format!(
                    "Comment {} not found",
                    reply_to_id
                )))
            }
        }
    }

    let mut comment = repo.create_comment(&caller.user_id, &request).await?;
    comment.author_username = caller.username;
    success(comment)
}

/// GET /api/posts/{id}/comments - Top-level comments with their direct replies.
pub async fn list_comments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<CommentThread>> {
    let repo = state.store.acquire().await?;

    if !repo.post_exists(&id).await? {
        return Err(AppError::NotFound(format!("Post {} not found", id)));
    }

    let threads = repo.list_comment_threads(&id).await?;
    success(threads)
}
