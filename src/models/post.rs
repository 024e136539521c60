//! Post models: stored posts, feed items, cache snapshots and request payloads.

use serde::{Deserialize, Serialize};

use super::{Vote, VoteType};
use crate::validation::{
    check_length, parse_bounded, require_id, RequestBody, ValidationError, ValidationKind,
};

/// Largest page a feed request may ask for.
pub const MAX_PAGE_SIZE: i64 = 50;

/// A post as stored. `content` is the editor's JSON document, kept opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub title: String,
    pub content: serde_json::Value,
    pub subreddit_id: String,
    pub author_id: String,
    pub created_at: String,
}

/// A post together with every vote cast on it.
#[derive(Debug, Clone)]
pub struct PostWithVotes {
    pub id: String,
    pub title: String,
    pub content: serde_json::Value,
    pub author_username: Option<String>,
    pub created_at: String,
    pub votes: Vec<Vote>,
}

/// A post as returned by the feed and detail endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSummary {
    pub id: String,
    pub title: String,
    pub content: serde_json::Value,
    pub subreddit_id: String,
    pub subreddit_name: String,
    pub author_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_username: Option<String>,
    pub created_at: String,
    pub vote_count: i64,
    pub current_vote: Option<VoteType>,
    pub comment_count: i64,
}

/// Denormalized snapshot of a popular post, written to the cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPost {
    pub id: String,
    pub title: String,
    pub author_username: String,
    /// Serialized JSON content
    pub content: String,
    pub current_vote: Option<VoteType>,
    pub created_at: String,
}

impl CachedPost {
    pub fn snapshot(post: &PostWithVotes, current_vote: Option<VoteType>) -> Self {
        Self {
            id: post.id.clone(),
            title: post.title.clone(),
            author_username: post.author_username.clone().unwrap_or_default(),
            content: post.content.to_string(),
            current_vote,
            created_at: post.created_at.clone(),
        }
    }

    /// Cache key the snapshot is stored under.
    pub fn key(&self) -> String {
        format!("post:{}", self.id)
    }

    /// Hash fields in the order they are written. A retracted vote is stored as "".
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.clone()),
            ("title", self.title.clone()),
            ("authorUsername", self.author_username.clone()),
            ("content", self.content.clone()),
            (
                "currentVote",
                self.current_vote
                    .map(|v| v.as_str().to_string())
                    .unwrap_or_default(),
            ),
            ("createdAt", self.created_at.clone()),
        ]
    }
}

/// Body of `POST /api/subreddit/post/create`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub title: String,
    pub subreddit_id: String,
    pub content: serde_json::Value,
}

impl RequestBody for CreatePostRequest {
    const FIELDS: &'static [&'static str] = &["title", "subredditId", "content"];

    fn validate(self) -> Result<Self, ValidationError> {
        let title = self.title.trim();
        check_length("title", title, 3, 128)?;
        require_id("subredditId", &self.subreddit_id)?;
        if self.content.is_null() {
            return Err(ValidationError::new("content", ValidationKind::Missing));
        }

        Ok(Self {
            title: title.to_string(),
            ..self
        })
    }
}

/// Raw query string of `GET /api/posts`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedQuery {
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub subreddit_name: Option<String>,
}

/// A validated feed page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    pub limit: i64,
    pub page: i64,
    pub subreddit_name: Option<String>,
}

impl FeedRequest {
    pub fn validate(query: &FeedQuery, default_limit: i64) -> Result<Self, ValidationError> {
        let limit = match query.limit.as_deref() {
            Some(raw) => parse_bounded("limit", raw, 1, MAX_PAGE_SIZE)?,
            None => default_limit.min(MAX_PAGE_SIZE),
        };
        let page = match query.page.as_deref() {
            Some(raw) => parse_bounded("page", raw, 1, i64::from(u32::MAX))?,
            None => 1,
        };
        let subreddit_name = query
            .subreddit_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        Ok(Self {
            limit,
            page,
            subreddit_name,
        })
    }

    /// Number of posts skipped before this page.
    pub fn offset(&self) -> i64 {
        self.limit * (self.page - 1)
    }
}
