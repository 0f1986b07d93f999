use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::backend::Collection;

pub const MAX_POST_CHARS: usize = 500;
pub const MAX_MESSAGE_CHARS: usize = 500;
pub const MAX_BIO_CHARS: usize = 200;
pub const MIN_PASSWORD_CHARS: usize = 6;

pub const FEED_LIMIT: u32 = 50;
pub const CHAT_LIMIT: u32 = 100;
pub const RECENT_PROFILES: u32 = 6;
pub const TRENDING_POSTS: u32 = 5;

/// A typed row of one collection.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn id(&self) -> Uuid;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub content: String,
    pub user_id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl Record for Post {
    const COLLECTION: Collection = Collection::Posts;

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPost {
    pub content: String,
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub message: String,
    pub user_id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl Record for ChatMessage {
    const COLLECTION: Collection = Collection::ChatMessages;

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewChatMessage {
    pub message: String,
    pub user_id: Uuid,
    pub username: String,
}

/// Public profile, keyed by the owner's identity id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for Profile {
    const COLLECTION: Collection = Collection::Profiles;

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileUpsert {
    pub id: Uuid,
    pub username: String,
    pub bio: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("nothing to send")]
    Empty,
    #[error("{len} characters is over the {max} character limit")]
    TooLong { len: usize, max: usize },
}

/// Checks composer text against its bound and returns it trimmed.
///
/// The bound applies to the text as typed. Whitespace-only text is empty.
pub fn validate_text(text: &str, max: usize) -> Result<&str, ValidationError> {
    let len = text.chars().count();
    if len > max {
        return Err(ValidationError::TooLong { len, max });
    }
    match text.trim() {
        "" => Err(ValidationError::Empty),
        trimmed => Ok(trimmed),
    }
}

/// Like [`validate_text`], but empty text is allowed and comes back as `None`.
pub fn validate_optional(text: &str, max: usize) -> Result<Option<&str>, ValidationError> {
    match validate_text(text, max) {
        Ok(trimmed) => Ok(Some(trimmed)),
        Err(ValidationError::Empty) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Whether a composer holding `text` may submit.
pub fn submit_enabled(text: &str, max: usize) -> bool {
    validate_text(text, max).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_only_cannot_submit() {
        assert!(!submit_enabled("", MAX_POST_CHARS));
        assert!(!submit_enabled("  \n\t ", MAX_POST_CHARS));
        assert!(submit_enabled(" hi ", MAX_POST_CHARS));
    }

    #[test]
    fn bound_counts_characters() {
        let at_limit = "é".repeat(MAX_POST_CHARS);
        assert!(submit_enabled(&at_limit, MAX_POST_CHARS));

        let over = "a".repeat(MAX_POST_CHARS + 1);
        assert_eq!(
            validate_text(&over, MAX_POST_CHARS),
            Err(ValidationError::TooLong { len: 501, max: 500 })
        );
    }

    #[test]
    fn returns_trimmed_text() {
        assert_eq!(validate_text("  hello\n", MAX_MESSAGE_CHARS), Ok("hello"));
    }

    #[test]
    fn optional_bio() {
        assert_eq!(validate_optional("   ", MAX_BIO_CHARS), Ok(None));
        assert_eq!(validate_optional(" hi ", MAX_BIO_CHARS), Ok(Some("hi")));
        assert!(validate_optional(&"x".repeat(201), MAX_BIO_CHARS).is_err());
    }

    #[test]
    fn post_decodes_from_stored_row() {
        let row = serde_json::json!({
            "id": "0190b3e2-7a3c-7cc0-8000-000000000001",
            "content": "hello",
            "user_id": "0190b3e2-7a3c-7cc0-8000-000000000002",
            "username": "ann",
            "created_at": "2024-07-01T12:00:00.000000Z",
        });
        let post: Post = serde_json::from_value(row).unwrap();
        assert_eq!(post.username, "ann");
        assert_eq!(post.created_at.timestamp(), 1_719_835_200);
    }
}
