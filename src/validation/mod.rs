//! Request payload validation.
//!
//! Bodies are deserialized into typed request structs by the [`ValidJson`]
//! extractor. A body that does not fit its struct becomes a [`ValidationError`]
//! naming the offending field; length and range checks then run on the typed
//! value through [`RequestBody::validate`].

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;

use crate::errors::AppError;

/// What was wrong with a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationKind {
    /// Body is not a JSON object
    Malformed,
    Missing,
    WrongType,
    /// Value is not one of the accepted choices
    InvalidChoice,
    /// Numeric value or string length outside `min..=max`
    OutOfRange { min: i64, max: i64 },
}

impl ValidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::Malformed => "malformed",
            ValidationKind::Missing => "missing",
            ValidationKind::WrongType => "wrong_type",
            ValidationKind::InvalidChoice => "invalid_choice",
            ValidationKind::OutOfRange { .. } => "out_of_range",
        }
    }
}

/// A field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub kind: ValidationKind,
}

impl ValidationError {
    pub fn new(field: &'static str, kind: ValidationKind) -> Self {
        Self { field, kind }
    }

    /// Map a rejected JSON body onto the request's fields.
    pub fn from_rejection(rejection: &JsonRejection, fields: &[&'static str]) -> Self {
        match rejection {
            JsonRejection::JsonDataError(_) => Self::from_data_error(&rejection.body_text(), fields),
            _ => Self::new("body", ValidationKind::Malformed),
        }
    }

    /// Attribute a serde data error to one of `fields`.
    ///
    /// serde names a missing field in backticks (`` missing field `postId` ``);
    /// any other failure is prefixed with the path of the field that failed
    /// (`voteType: unknown variant ...`).
    fn from_data_error(message: &str, fields: &[&'static str]) -> Self {
        let field = fields.iter().copied().find(|field| {
            message.contains(&format!("`{}`", field))
                || message.contains(&format!(": {}: ", field))
                || message.starts_with(&format!("{}: ", field))
        });

        let kind = if message.contains("missing field") || message.contains("invalid type: null") {
            ValidationKind::Missing
        } else if message.contains("unknown variant") {
            ValidationKind::InvalidChoice
        } else if message.contains("invalid type") {
            ValidationKind::WrongType
        } else {
            ValidationKind::Malformed
        };

        match field {
            Some(field) => Self::new(field, kind),
            None => Self::new("body", ValidationKind::Malformed),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ValidationKind::Malformed => write!(f, "Request body must be a JSON object"),
            ValidationKind::Missing => write!(f, "{} is required", self.field),
            ValidationKind::WrongType => write!(f, "{} has the wrong type", self.field),
            ValidationKind::InvalidChoice => write!(f, "{} is not an accepted value", self.field),
            ValidationKind::OutOfRange { min, max } => {
                write!(f, "{} must be between {} and {}", self.field, min, max)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// A typed request body.
pub trait RequestBody: DeserializeOwned + Sized {
    /// JSON names of the body's fields.
    const FIELDS: &'static [&'static str];

    /// Length and blank-value checks on the deserialized body.
    fn validate(self) -> Result<Self, ValidationError>;
}

/// `Json<T>` whose rejections and semantic failures are [`ValidationError`]s.
#[derive(Debug, Clone)]
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: RequestBody,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ValidationError::from_rejection(&rejection, T::FIELDS))?;
        Ok(ValidJson(body.validate()?))
    }
}

/// Check that `value` has between `min` and `max` characters.
pub fn check_length(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ValidationError::new(
            field,
            ValidationKind::OutOfRange {
                min: min as i64,
                max: max as i64,
            },
        ));
    }
    Ok(())
}

/// Reject a blank identifier.
pub fn require_id(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, ValidationKind::Missing));
    }
    Ok(())
}

/// Parse an integer query parameter and check it lies in `min..=max`.
pub fn parse_bounded(
    field: &'static str,
    raw: &str,
    min: i64,
    max: i64,
) -> Result<i64, ValidationError> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ValidationError::new(field, ValidationKind::WrongType))?;
    if value < min || value > max {
        return Err(ValidationError::new(
            field,
            ValidationKind::OutOfRange { min, max },
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: &[&str] = &["postId", "voteType"];

    #[test]
    fn test_missing_field_is_attributed() {
        let err = ValidationError::from_data_error(
            "Failed to deserialize the JSON body into the target type: missing field `postId` at line 1 column 20",
            FIELDS,
        );
        assert_eq!(err, ValidationError::new("postId", ValidationKind::Missing));
    }

    #[test]
    fn test_field_path_prefix_is_attributed() {
        let err = ValidationError::from_data_error(
            "Failed to deserialize the JSON body into the target type: voteType: unknown variant `up`, expected `UP` or `DOWN` at line 1 column 33",
            FIELDS,
        );
        assert_eq!(
            err,
            ValidationError::new("voteType", ValidationKind::InvalidChoice)
        );

        let err = ValidationError::from_data_error(
            "postId: invalid type: integer `12`, expected a string at line 1 column 12",
            FIELDS,
        );
        assert_eq!(err, ValidationError::new("postId", ValidationKind::WrongType));

        let err = ValidationError::from_data_error(
            "postId: invalid type: null, expected a string at line 1 column 14",
            FIELDS,
        );
        assert_eq!(err, ValidationError::new("postId", ValidationKind::Missing));
    }

    #[test]
    fn test_unattributed_error_is_malformed() {
        let err = ValidationError::from_data_error(
            "invalid type: sequence, expected struct VoteRequest at line 1 column 0",
            FIELDS,
        );
        assert_eq!(err, ValidationError::new("body", ValidationKind::Malformed));
    }

    #[test]
    fn test_check_length_counts_chars() {
        assert!(check_length("name", "abc", 3, 21).is_ok());
        assert!(check_length("name", "ab", 3, 21).is_err());
        assert!(check_length("name", "ééé", 3, 3).is_ok());
        assert!(check_length("name", &"x".repeat(22), 3, 21).is_err());
    }

    #[test]
    fn test_require_id() {
        assert!(require_id("postId", "p1").is_ok());
        assert_eq!(
            require_id("postId", "  ").unwrap_err(),
            ValidationError::new("postId", ValidationKind::Missing)
        );
    }

    #[test]
    fn test_parse_bounded() {
        assert_eq!(parse_bounded("limit", "10", 1, 50).unwrap(), 10);
        assert_eq!(
            parse_bounded("limit", "ten", 1, 50).unwrap_err().kind,
            ValidationKind::WrongType
        );
        assert_eq!(
            parse_bounded("page", "0", 1, i64::MAX).unwrap_err().kind,
            ValidationKind::OutOfRange {
                min: 1,
                max: i64::MAX
            }
        );
    }
}
