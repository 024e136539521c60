//! Subreddit (community) and subscription models.

use serde::{Deserialize, Serialize};

use crate::validation::{check_length, require_id, RequestBody, ValidationError};

/// A community that posts belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subreddit {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    pub created_at: String,
}

/// A subreddit as shown on its community page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubredditDetails {
    #[serde(flatten)]
    pub subreddit: Subreddit,
    pub member_count: i64,
    pub is_subscribed: bool,
}

/// Body of `POST /api/subreddit`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubredditRequest {
    pub name: String,
}

impl RequestBody for CreateSubredditRequest {
    const FIELDS: &'static [&'static str] = &["name"];

    fn validate(self) -> Result<Self, ValidationError> {
        check_length("name", &self.name, 3, 21)?;
        Ok(self)
    }
}

/// Body of the subscribe and unsubscribe endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub subreddit_id: String,
}

impl RequestBody for SubscriptionRequest {
    const FIELDS: &'static [&'static str] = &["subredditId"];

    fn validate(self) -> Result<Self, ValidationError> {
        require_id("subredditId", &self.subreddit_id)?;
        Ok(self)
    }
}
