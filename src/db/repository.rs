//! Database repository for CRUD operations.
//!
//! Uses prepared statements and transactions for data integrity.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    vote_count, Comment, CommentThread, CreateCommentRequest, CreatePostRequest, FeedRequest, Post,
    PostSummary, Subreddit, User, Vote, VoteType,
};

const POST_SUMMARY_SELECT: &str = r#"SELECT p.id, p.title, p.content, p.subreddit_id,
       s.name AS subreddit_name, p.author_id, u.username AS author_username, p.created_at,
       (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count
FROM posts p
JOIN subreddits s ON s.id = p.subreddit_id
LEFT JOIN users u ON u.id = p.author_id"#;

const COMMENT_SELECT: &str = r#"SELECT c.id, c.text, c.post_id, c.author_id, u.username AS author_username,
       c.reply_to_id, c.created_at
FROM comments c
LEFT JOIN users u ON u.id = c.author_id"#;

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pub(super) pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== SESSION OPERATIONS ====================

    /// Resolve a session token to its user. Unknown and expired tokens yield `None`.
    pub async fn find_session_user(&self, token: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(
            "SELECT u.id, u.username, u.email, u.image, s.expires_at FROM sessions s JOIN users u ON u.id = s.user_id WHERE s.token = ?"
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: String = row.get("expires_at");
        let expired = DateTime::parse_from_rfc3339(&expires_at)
            .map(|t| t <= Utc::now())
            .unwrap_or(true);
        if expired {
            tracing::debug!("Session expired at {}", expires_at);
            return Ok(None);
        }

        Ok(Some(user_from_row(&row)))
    }

    // ==================== SUBREDDIT OPERATIONS ====================

    /// Get a subreddit by ID.
    pub async fn get_subreddit(&self, id: &str) -> Result<Option<Subreddit>, AppError> {
        let row = sqlx::query("SELECT id, name, creator_id, created_at FROM subreddits WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(subreddit_from_row))
    }

    /// Get a subreddit by its unique name.
    pub async fn find_subreddit_by_name(&self, name: &str) -> Result<Option<Subreddit>, AppError> {
        let row =
            sqlx::query("SELECT id, name, creator_id, created_at FROM subreddits WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.as_ref().map(subreddit_from_row))
    }

    /// Create a subreddit and subscribe its creator to it.
    pub async fn create_subreddit(
        &self,
        name: &str,
        creator_id: &str,
    ) -> Result<Subreddit, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO subreddits (id, name, creator_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(creator_id)
        .bind(&now)
        .execute(&mut *tx)
        .await;

        if let Err(err) = result {
            return Err(match AppError::from(err) {
                AppError::Conflict(_) => {
                    AppError::Conflict(format!("Subreddit {} already exists", name))
                }
                other => other,
            });
        }

        sqlx::query("INSERT INTO subscriptions (user_id, subreddit_id) VALUES (?, ?)")
            .bind(creator_id)
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Subreddit {
            id,
            name: name.to_string(),
            creator_id: Some(creator_id.to_string()),
            created_at: now,
        })
    }

    // ==================== SUBSCRIPTION OPERATIONS ====================

    pub async fn is_subscribed(&self, user_id: &str, subreddit_id: &str) -> Result<bool, AppError> {
        let row = sqlx::query(
            "SELECT 1 AS found FROM subscriptions WHERE user_id = ? AND subreddit_id = ?",
        )
        .bind(user_id)
        .bind(subreddit_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Number of users subscribed to a subreddit.
    pub async fn count_subscribers(&self, subreddit_id: &str) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS members FROM subscriptions WHERE subreddit_id = ?")
            .bind(subreddit_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("members"))
    }

    pub async fn subscribe(&self, user_id: &str, subreddit_id: &str) -> Result<(), AppError> {
        sqlx::query("INSERT INTO subscriptions (user_id, subreddit_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(subreddit_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, user_id: &str, subreddit_id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = ? AND subreddit_id = ?")
            .bind(user_id)
            .bind(subreddit_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::BadRequest("Not yet subscribed".to_string()));
        }
        Ok(())
    }

    // ==================== POST OPERATIONS ====================

    pub async fn post_exists(&self, id: &str) -> Result<bool, AppError> {
        let row = sqlx::query("SELECT 1 AS found FROM posts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Create a new post.
    pub async fn create_post(
        &self,
        author_id: &str,
        request: &CreatePostRequest,
    ) -> Result<Post, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now();
        let content_json = serde_json::to_string(&request.content)?;

        sqlx::query(
            "INSERT INTO posts (id, title, content, subreddit_id, author_id, created_at) VALUES (?, ?, ?, ?, ?, ?)"
        )
        .bind(&id)
        .bind(&request.title)
        .bind(&content_json)
        .bind(&request.subreddit_id)
        .bind(author_id)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(Post {
            id,
            title: request.title.clone(),
            content: request.content.clone(),
            subreddit_id: request.subreddit_id.clone(),
            author_id: author_id.to_string(),
            created_at: now,
        })
    }

    /// Get a single post with its vote count and the viewer's vote.
    pub async fn get_post_summary(
        &self,
        id: &str,
        viewer_id: Option<&str>,
    ) -> Result<Option<PostSummary>, AppError> {
        let sql = format!("{} WHERE p.id = ?", POST_SUMMARY_SELECT);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.summarize(&row, viewer_id).await?)),
            None => Ok(None),
        }
    }

    /// List a page of posts, newest first.
    ///
    /// Filters by subreddit name when one is given, otherwise by the viewer's
    /// subscriptions when signed in, otherwise returns every post.
    pub async fn list_posts(
        &self,
        request: &FeedRequest,
        viewer_id: Option<&str>,
    ) -> Result<Vec<PostSummary>, AppError> {
        let mut query = QueryBuilder::<Sqlite>::new(POST_SUMMARY_SELECT);

        if let Some(name) = &request.subreddit_name {
            query.push(" WHERE s.name = ").push_bind(name.clone());
        } else if let Some(viewer_id) = viewer_id {
            query
                .push(" WHERE p.subreddit_id IN (SELECT subreddit_id FROM subscriptions WHERE user_id = ")
                .push_bind(viewer_id.to_string())
                .push(")");
        }

        query
            .push(" ORDER BY p.created_at DESC, p.rowid DESC LIMIT ")
            .push_bind(request.limit)
            .push(" OFFSET ")
            .push_bind(request.offset());

        let rows = query.build().fetch_all(&self.pool).await?;

        let mut posts = Vec::with_capacity(rows.len());
        for row in &rows {
            posts.push(self.summarize(row, viewer_id).await?);
        }
        Ok(posts)
    }

    /// All votes cast on a post.
    pub(super) async fn votes_for_post(&self, post_id: &str) -> Result<Vec<Vote>, AppError> {
        let rows = sqlx::query("SELECT user_id, post_id, type FROM votes WHERE post_id = ?")
            .bind(post_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().filter_map(vote_from_row).collect())
    }

    async fn summarize(
        &self,
        row: &SqliteRow,
        viewer_id: Option<&str>,
    ) -> Result<PostSummary, AppError> {
        let id: String = row.get("id");
        let votes = self.votes_for_post(&id).await?;
        let current_vote = viewer_id.and_then(|viewer| {
            votes
                .iter()
                .find(|v| v.user_id == viewer)
                .map(|v| v.vote_type)
        });
        let content: String = row.get("content");

        Ok(PostSummary {
            id,
            title: row.get("title"),
            content: parse_json(&content),
            subreddit_id: row.get("subreddit_id"),
            subreddit_name: row.get("subreddit_name"),
            author_id: row.get("author_id"),
            author_username: row.get("author_username"),
            created_at: row.get("created_at"),
            vote_count: vote_count(&votes),
            current_vote,
            comment_count: row.get("comment_count"),
        })
    }

    // ==================== COMMENT OPERATIONS ====================

    /// Get a comment by ID.
    pub async fn get_comment(&self, id: &str) -> Result<Option<Comment>, AppError> {
        let sql = format!("{} WHERE c.id = ?", COMMENT_SELECT);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(comment_from_row))
    }

    /// Create a new comment.
    pub async fn create_comment(
        &self,
        author_id: &str,
        request: &CreateCommentRequest,
    ) -> Result<Comment, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now();

        sqlx::query(
            "INSERT INTO comments (id, text, post_id, author_id, reply_to_id, created_at) VALUES (?, ?, ?, ?, ?, ?)"
        )
        .bind(&id)
        .bind(&request.text)
        .bind(&request.post_id)
        .bind(author_id)
        .bind(&request.reply_to_id)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(Comment {
            id,
            text: request.text.clone(),
            post_id: request.post_id.clone(),
            author_id: author_id.to_string(),
            author_username: None,
            reply_to_id: request.reply_to_id.clone(),
            created_at: now,
        })
    }

    /// Top-level comments of a post, newest first, each with its direct replies.
    pub async fn list_comment_threads(&self, post_id: &str) -> Result<Vec<CommentThread>, AppError> {
        let sql = format!(
            "{} WHERE c.post_id = ? ORDER BY c.created_at ASC, c.rowid ASC",
            COMMENT_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(post_id)
            .fetch_all(&self.pool)
            .await?;

        let mut top_level = Vec::new();
        let mut replies: HashMap<String, Vec<Comment>> = HashMap::new();
        for comment in rows.iter().map(comment_from_row) {
            match comment.reply_to_id.clone() {
                Some(parent) => replies.entry(parent).or_default().push(comment),
                None => top_level.push(comment),
            }
        }

        Ok(top_level
            .into_iter()
            .rev()
            .map(|comment| CommentThread {
                replies: replies.remove(&comment.id).unwrap_or_default(),
                comment,
            })
            .collect())
    }
}

#[cfg(test)]
impl Repository {
    /// Insert a user directly; accounts normally come from the identity provider.
    pub async fn create_user(&self, username: &str) -> Result<User, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO users (id, username, created_at) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(username)
            .bind(now())
            .execute(&self.pool)
            .await?;

        Ok(User {
            id,
            username: Some(username.to_string()),
            email: None,
            image: None,
        })
    }

    /// Insert a session row for `user_id`.
    pub async fn create_session(
        &self,
        user_id: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(token)
            .bind(user_id)
            .bind(expires_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// Helper functions for row conversion

/// Current time as an RFC 3339 string with sub-second precision, so rows sort by creation.
fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        image: row.get("image"),
    }
}

fn subreddit_from_row(row: &SqliteRow) -> Subreddit {
    Subreddit {
        id: row.get("id"),
        name: row.get("name"),
        creator_id: row.get("creator_id"),
        created_at: row.get("created_at"),
    }
}

pub(super) fn vote_from_row(row: &SqliteRow) -> Option<Vote> {
    let type_str: String = row.get("type");
    let Ok(vote_type) = type_str.parse::<VoteType>() else {
        tracing::warn!("Ignoring vote with unknown type {:?}", type_str);
        return None;
    };
    Some(Vote {
        user_id: row.get("user_id"),
        post_id: row.get("post_id"),
        vote_type,
    })
}

fn comment_from_row(row: &SqliteRow) -> Comment {
    Comment {
        id: row.get("id"),
        text: row.get("text"),
        post_id: row.get("post_id"),
        author_id: row.get("author_id"),
        author_username: row.get("author_username"),
        reply_to_id: row.get("reply_to_id"),
        created_at: row.get("created_at"),
    }
}

pub(super) fn parse_json(s: &str) -> serde_json::Value {
    serde_json::from_str(s).unwrap_or(serde_json::Value::Null)
}
