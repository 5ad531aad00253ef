use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A post built from a channel item that has not been written yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDraft {
    pub id: Uuid,
    pub title: String,
    /// Canonical link. Posts are deduplicated on this alone.
    pub url: String,
    pub description: Option<String>,
    /// `None` when the source date was missing or could not be parsed.
    pub published_at: Option<DateTime<Utc>>,
    pub feed_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub feed_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PostDraft> for Post {
    fn from(draft: PostDraft) -> Self {
        Self {
            id: draft.id,
            title: draft.title,
            url: draft.url,
            description: draft.description,
            published_at: draft.published_at,
            feed_id: draft.feed_id,
            created_at: draft.created_at,
            updated_at: draft.updated_at,
        }
    }
}

impl Post {
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            "(Untitled)"
        } else {
            &self.title
        }
    }
}

/// A post as shown in `browse`, with the name of the feed it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostView {
    pub post: Post,
    pub feed_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> PostDraft {
        let now = Utc::now();
        PostDraft {
            id: Uuid::new_v4(),
            title: "Hello".into(),
            url: "https://example.com/hello".into(),
            description: None,
            published_at: None,
            feed_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_post_from_draft_keeps_fields() {
        let d = draft();
        let post = Post::from(d.clone());
        assert_eq!(post.id, d.id);
        assert_eq!(post.url, d.url);
        assert_eq!(post.feed_id, d.feed_id);
    }

    #[test]
    fn test_display_title_without_title() {
        let mut post = Post::from(draft());
        post.title = String::new();
        assert_eq!(post.display_title(), "(Untitled)");
    }
}
