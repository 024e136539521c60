//! Comment models.

use serde::{Deserialize, Serialize};

use crate::validation::{check_length, require_id, RequestBody, ValidationError};

/// A comment on a post, optionally replying to another comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub text: String,
    pub post_id: String,
    pub author_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    pub created_at: String,
}

/// A top-level comment with its direct replies.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentThread {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<Comment>,
}

/// Body of `PATCH /api/subreddit/post/comment`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub post_id: String,
    pub text: String,
    #[serde(default)]
    pub reply_to_id: Option<String>,
}

impl RequestBody for CreateCommentRequest {
    const FIELDS: &'static [&'static str] = &["postId", "text", "replyToId"];

    fn validate(self) -> Result<Self, ValidationError> {
        require_id("postId", &self.post_id)?;
        let text = self.text.trim();
        check_length("text", text, 1, 10_000)?;

        Ok(Self {
            text: text.to_string(),
            reply_to_id: self.reply_to_id.filter(|id| !id.trim().is_empty()),
            ..self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationKind;

    #[test]
    fn test_create_comment_validation() {
        let request: CreateCommentRequest =
            serde_json::from_str(r#"{"postId": "p1", "text": "  hello  ", "replyToId": ""}"#)
                .unwrap();
        let request = request.validate().unwrap();
        assert_eq!(request.text, "hello");
        assert_eq!(request.reply_to_id, None);

        let blank: CreateCommentRequest =
            serde_json::from_str(r#"{"postId": "p1", "text": "   "}"#).unwrap();
        assert_eq!(
            blank.validate().unwrap_err(),
            ValidationError::new("text", ValidationKind::OutOfRange { min: 1, max: 10_000 })
        );
    }
}
