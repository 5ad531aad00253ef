use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    /// The user who added the feed. Following is tracked separately.
    pub user_id: Uuid,
    /// `None` until the aggregator first picks the feed up.
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Feed {
    pub fn new(name: String, url: String, user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            url,
            user_id,
            last_fetched_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn display_title(&self) -> &str {
        if self.name.is_empty() {
            &self.url
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_feed_is_never_fetched() {
        let feed = Feed::new("Blog".into(), "https://example.com/rss".into(), Uuid::new_v4());
        assert!(feed.last_fetched_at.is_none());
        assert_eq!(feed.created_at, feed.updated_at);
    }

    #[test]
    fn test_display_title_falls_back_to_url() {
        let feed = Feed::new(String::new(), "https://example.com/rss".into(), Uuid::new_v4());
        assert_eq!(feed.display_title(), "https://example.com/rss");
    }
}
