//! Vote model and the vote request payload.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::validation::{require_id, RequestBody, ValidationError, ValidationKind};

/// Direction of a vote.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteType {
    Up,
    Down,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::Up => "UP",
            VoteType::Down => "DOWN",
        }
    }

    /// Contribution of one vote to the post's vote count.
    pub fn weight(&self) -> i64 {
        match self {
            VoteType::Up => 1,
            VoteType::Down => -1,
        }
    }
}

impl FromStr for VoteType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(VoteType::Up),
            "DOWN" => Ok(VoteType::Down),
            _ => Err(ValidationError::new("type", ValidationKind::InvalidChoice)),
        }
    }
}

/// A single user's vote on a post. At most one exists per (user, post).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub user_id: String,
    pub post_id: String,
    #[serde(rename = "type")]
    pub vote_type: VoteType,
}

/// Signed vote count: +1 per upvote, -1 per downvote.
pub fn vote_count(votes: &[Vote]) -> i64 {
    votes.iter().map(|v| v.vote_type.weight()).sum()
}

/// Body of `PATCH /api/subreddit/post/vote`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub post_id: String,
    pub vote_type: VoteType,
}

impl RequestBody for VoteRequest {
    const FIELDS: &'static [&'static str] = &["postId", "voteType"];

    fn validate(self) -> Result<Self, ValidationError> {
        require_id("postId", &self.post_id)?;
        Ok(self)
    }
}
