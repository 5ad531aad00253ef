pub mod sqlite;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::app::Result;
use crate::domain::{Feed, FeedFollowView, Post, PostDraft, PostView, User};

pub use sqlite::SqliteStore;

pub trait Store {
    // User operations
    fn create_user(&self, name: &str) -> Result<User>;
    fn get_user(&self, id: Uuid) -> Result<Option<User>>;
    fn get_user_by_name(&self, name: &str) -> Result<Option<User>>;
    fn list_users(&self) -> Result<Vec<User>>;
    /// Removes every user; feeds, follows and posts go with them.
    fn delete_all_users(&self) -> Result<usize>;

    // Feed operations
    fn create_feed(&self, name: &str, url: &str, user_id: Uuid) -> Result<Feed>;
    fn get_feed(&self, id: Uuid) -> Result<Option<Feed>>;
    fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>>;
    fn list_feeds(&self) -> Result<Vec<Feed>>;

    // Scheduling
    /// The least recently fetched feed, never-fetched feeds first.
    fn next_feed_to_fetch(&self) -> Result<Option<Feed>> {
        Ok(self.next_feeds_to_fetch(1)?.into_iter().next())
    }
    fn next_feeds_to_fetch(&self, limit: usize) -> Result<Vec<Feed>>;
    fn mark_feed_fetched(&self, feed_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    // Follow operations
    fn create_feed_follow(&self, user_id: Uuid, feed_id: Uuid) -> Result<FeedFollowView>;
    /// Returns false when there was no such edge.
    fn delete_feed_follow(&self, user_id: Uuid, feed_id: Uuid) -> Result<bool>;
    fn list_follows_for_user(&self, user_id: Uuid) -> Result<Vec<FeedFollowView>>;

    // Post operations
    /// Fails with `DuplicateLink` if a post with the same url exists.
    fn insert_post(&self, draft: &PostDraft) -> Result<Post>;
    fn get_post_by_url(&self, url: &str) -> Result<Option<Post>>;
    fn list_posts_for_user(&self, user_id: Uuid, limit: usize) -> Result<Vec<PostView>>;
    fn count_posts(&self) -> Result<i64>;
}
