use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum GatorError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Feed not found: {0}")]
    FeedNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("User already exists: {0}")]
    DuplicateUser(String),

    #[error("Feed already exists: {0}")]
    DuplicateFeed(String),

    #[error("Already following feed: {0}")]
    DuplicateFollow(String),

    #[error("Not following feed: {0}")]
    NotFollowing(String),

    #[error("Post already exists: {0}")]
    DuplicateLink(String),

    #[error("Not logged in: run `gator login <name>` or `gator register <name>` first")]
    NotLoggedIn,

    #[error("Invalid interval {input:?}: {reason}")]
    InvalidInterval { input: String, reason: String },

    #[error("{0}")]
    Other(String),
}

impl GatorError {
    /// True for errors raised by a UNIQUE constraint.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            GatorError::DuplicateUser(_)
                | GatorError::DuplicateFeed(_)
                | GatorError::DuplicateFollow(_)
                | GatorError::DuplicateLink(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GatorError>;
