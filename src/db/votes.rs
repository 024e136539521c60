//! SQLite implementation of the vote store.

use async_trait::async_trait;
use sqlx::Row;

use super::repository::{parse_json, vote_from_row};
use super::Repository;
use crate::errors::AppError;
use crate::models::{PostWithVotes, VoteType};
use crate::votes::VoteStore;

#[async_trait]
impl VoteStore for Repository {
    async fn find_vote(&self, user_id: &str, post_id: &str) -> Result<Option<VoteType>, AppError> {
        let row = sqlx::query("SELECT user_id, post_id, type FROM votes WHERE user_id = ? AND post_id = ?")
            .bind(user_id)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().and_then(vote_from_row).map(|v| v.vote_type))
    }

    async fn create_vote(
        &self,
        user_id: &str,
        post_id: &str,
        vote_type: VoteType,
    ) -> Result<(), AppError> {
        // Primary key (user_id, post_id) turns a duplicate into a unique violation -> Conflict
        sqlx::query("INSERT INTO votes (user_id, post_id, type) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(post_id)
            .bind(vote_type.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_vote_type(
        &self,
        user_id: &str,
        post_id: &str,
        vote_type: VoteType,
    ) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE votes SET type = ? WHERE user_id = ? AND post_id = ?")
            .bind(vote_type.as_str())
            .bind(user_id)
            .bind(post_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Vote by {} on {} disappeared before update",
                user_id, post_id
            )));
        }
        Ok(())
    }

    async fn delete_vote(&self, user_id: &str, post_id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM votes WHERE user_id = ? AND post_id = ?")
            .bind(user_id)
            .bind(post_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Vote by {} on {} disappeared before delete",
                user_id, post_id
            )));
        }
        Ok(())
    }

    async fn find_post_with_votes(
        &self,
        post_id: &str,
    ) -> Result<Option<PostWithVotes>, AppError> {
        let row = sqlx::query(
            "SELECT p.id, p.title, p.content, p.created_at, u.username AS author_username FROM posts p LEFT JOIN users u ON u.id = p.author_id WHERE p.id = ?"
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let votes = self.votes_for_post(post_id).await?;
        let content: String = row.get("content");

        Ok(Some(PostWithVotes {
            id: row.get("id"),
            title: row.get("title"),
            content: parse_json(&content),
            author_username: row.get("author_username"),
            created_at: row.get("created_at"),
            votes,
        }))
    }
}
