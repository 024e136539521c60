//! Data models for the threadit backend.
//!
//! Field names serialize in camelCase to match the web client.

mod comment;
mod post;
mod subreddit;
mod user;
mod vote;

pub use comment::*;
pub use post::*;
pub use subreddit::*;
pub use user::*;
pub use vote::*;
