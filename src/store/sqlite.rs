use std::os::raw::c_int;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{ffi, params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};
use uuid::Uuid;

use crate::app::{GatorError, Result};
use crate::domain::{Feed, FeedFollow, FeedFollowView, Post, PostDraft, PostView, User};
use crate::store::Store;

const FEED_COLUMNS: &str = "id, name, url, user_id, last_fetched_at, created_at, updated_at";
const POST_COLUMNS: &str =
    "p.id, p.title, p.url, p.description, p.published_at, p.feed_id, p.created_at, p.updated_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.lock()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations.to_latest(&mut conn)?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| GatorError::Other(format!("database lock poisoned: {}", e)))
    }
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    // Fixed width so that ORDER BY on the text column is chronological.
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn datetime_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_datetime(idx, &s)
}

fn optional_datetime_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| parse_datetime(idx, &s))
        .transpose()
}

/// Extended result code of a constraint violation, if that is what `err` is.
fn constraint_violation(err: &rusqlite::Error) -> Option<c_int> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            Some(e.extended_code)
        }
        _ => None,
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        created_at: datetime_at(row, 2)?,
        updated_at: datetime_at(row, 3)?,
    })
}

fn feed_from_row(row: &Row<'_>) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        user_id: uuid_at(row, 3)?,
        last_fetched_at: optional_datetime_at(row, 4)?,
        created_at: datetime_at(row, 5)?,
        updated_at: datetime_at(row, 6)?,
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: uuid_at(row, 0)?,
        title: row.get(1)?,
        url: row.get(2)?,
        description: row.get(3)?,
        published_at: optional_datetime_at(row, 4)?,
        feed_id: uuid_at(row, 5)?,
        created_at: datetime_at(row, 6)?,
        updated_at: datetime_at(row, 7)?,
    })
}

fn follow_view_from_row(row: &Row<'_>) -> rusqlite::Result<FeedFollowView> {
    Ok(FeedFollowView {
        follow: FeedFollow {
            id: uuid_at(row, 0)?,
            user_id: uuid_at(row, 1)?,
            feed_id: uuid_at(row, 2)?,
            created_at: datetime_at(row, 3)?,
            updated_at: datetime_at(row, 4)?,
        },
        user_name: row.get(5)?,
        feed_name: row.get(6)?,
    })
}

const FOLLOW_VIEW_SELECT: &str =
    "SELECT ff.id, ff.user_id, ff.feed_id, ff.created_at, ff.updated_at, u.name, f.name
     FROM feed_follows ff
     JOIN users u ON u.id = ff.user_id
     JOIN feeds f ON f.id = ff.feed_id";

impl Store for SqliteStore {
    fn create_user(&self, name: &str) -> Result<User> {
        let conn = self.lock()?;
        let user = User::new(name.to_string());

        conn.execute(
            "INSERT INTO users (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                user.id.to_string(),
                user.name,
                format_datetime(&user.created_at),
                format_datetime(&user.updated_at)
            ],
        )
        .map_err(|e| match constraint_violation(&e) {
            Some(ffi::SQLITE_CONSTRAINT_UNIQUE) => GatorError::DuplicateUser(name.to_string()),
            _ => e.into(),
        })?;

        Ok(user)
    }

    fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                "SELECT id, name, created_at, updated_at FROM users WHERE id = ?1",
                params![id.to_string()],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn get_user_by_name(&self, name: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                "SELECT id, name, created_at, updated_at FROM users WHERE name = ?1",
                params![name],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, name, created_at, updated_at FROM users ORDER BY name")?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn delete_all_users(&self) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM users", [])?)
    }

    fn create_feed(&self, name: &str, url: &str, user_id: Uuid) -> Result<Feed> {
        let conn = self.lock()?;
        let feed = Feed::new(name.to_string(), url.to_string(), user_id);

        conn.execute(
            "INSERT INTO feeds (id, name, url, user_id, last_fetched_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)",
            params![
                feed.id.to_string(),
                feed.name,
                feed.url,
                feed.user_id.to_string(),
                format_datetime(&feed.created_at),
                format_datetime(&feed.updated_at)
            ],
        )
        .map_err(|e| match constraint_violation(&e) {
            Some(ffi::SQLITE_CONSTRAINT_UNIQUE) => GatorError::DuplicateFeed(url.to_string()),
            Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => GatorError::UserNotFound(user_id.to_string()),
            _ => e.into(),
        })?;

        Ok(feed)
    }

    fn get_feed(&self, id: Uuid) -> Result<Option<Feed>> {
        let conn = self.lock()?;
        let feed = conn
            .query_row(
                &format!("SELECT {} FROM feeds WHERE id = ?1", FEED_COLUMNS),
                params![id.to_string()],
                feed_from_row,
            )
            .optional()?;
        Ok(feed)
    }

    fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let conn = self.lock()?;
        let feed = conn
            .query_row(
                &format!("SELECT {} FROM feeds WHERE url = ?1", FEED_COLUMNS),
                params![url],
                feed_from_row,
            )
            .optional()?;
        Ok(feed)
    }

    fn list_feeds(&self) -> Result<Vec<Feed>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM feeds ORDER BY name, url",
            FEED_COLUMNS
        ))?;
        let feeds = stmt
            .query_map([], feed_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feeds)
    }

    fn next_feeds_to_fetch(&self, limit: usize) -> Result<Vec<Feed>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM feeds
             ORDER BY last_fetched_at IS NOT NULL, last_fetched_at ASC, created_at ASC
             LIMIT ?1",
            FEED_COLUMNS
        ))?;
        let feeds = stmt
            .query_map(params![limit as i64], feed_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feeds)
    }

    fn mark_feed_fetched(&self, feed_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        let at = format_datetime(&at);
        let updated = conn.execute(
            "UPDATE feeds SET last_fetched_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![at, feed_id.to_string()],
        )?;

        if updated == 0 {
            return Err(GatorError::FeedNotFound(feed_id.to_string()));
        }
        Ok(())
    }

    fn create_feed_follow(&self, user_id: Uuid, feed_id: Uuid) -> Result<FeedFollowView> {
        let conn = self.lock()?;
        let follow = FeedFollow::new(user_id, feed_id);

        conn.execute(
            "INSERT INTO feed_follows (id, user_id, feed_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                follow.id.to_string(),
                follow.user_id.to_string(),
                follow.feed_id.to_string(),
                format_datetime(&follow.created_at),
                format_datetime(&follow.updated_at)
            ],
        )
        .map_err(|e| match constraint_violation(&e) {
            Some(ffi::SQLITE_CONSTRAINT_UNIQUE) => GatorError::DuplicateFollow(feed_id.to_string()),
            Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => GatorError::FeedNotFound(feed_id.to_string()),
            _ => e.into(),
        })?;

        let view = conn.query_row(
            &format!("{} WHERE ff.id = ?1", FOLLOW_VIEW_SELECT),
            params![follow.id.to_string()],
            follow_view_from_row,
        )?;
        Ok(view)
    }

    fn delete_feed_follow(&self, user_id: Uuid, feed_id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM feed_follows WHERE user_id = ?1 AND feed_id = ?2",
            params![user_id.to_string(), feed_id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    fn list_follows_for_user(&self, user_id: Uuid) -> Result<Vec<FeedFollowView>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE ff.user_id = ?1 ORDER BY f.name",
            FOLLOW_VIEW_SELECT
        ))?;
        let follows = stmt
            .query_map(params![user_id.to_string()], follow_view_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(follows)
    }

    fn insert_post(&self, draft: &PostDraft) -> Result<Post> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO posts (id, title, url, description, published_at, feed_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                draft.id.to_string(),
                draft.title,
                draft.url,
                draft.description,
                draft.published_at.as_ref().map(format_datetime),
                draft.feed_id.to_string(),
                format_datetime(&draft.created_at),
                format_datetime(&draft.updated_at)
            ],
        )
        .map_err(|e| match constraint_violation(&e) {
            Some(ffi::SQLITE_CONSTRAINT_UNIQUE) => GatorError::DuplicateLink(draft.url.clone()),
            Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => {
                GatorError::FeedNotFound(draft.feed_id.to_string())
            }
            _ => e.into(),
        })?;

        Ok(Post::from(draft.clone()))
    }

    fn get_post_by_url(&self, url: &str) -> Result<Option<Post>> {
        let conn = self.lock()?;
        let post = conn
            .query_row(
                &format!("SELECT {} FROM posts p WHERE p.url = ?1", POST_COLUMNS),
                params![url],
                post_from_row,
            )
            .optional()?;
        Ok(post)
    }

    fn list_posts_for_user(&self, user_id: Uuid, limit: usize) -> Result<Vec<PostView>> {
        let conn = self.lock()?;
        // Scoped by the follow edges that exist now, not when the post was ingested.
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, f.name
             FROM posts p
             JOIN feeds f ON f.id = p.feed_id
             JOIN feed_follows ff ON ff.feed_id = p.feed_id
             WHERE ff.user_id = ?1
             ORDER BY p.published_at IS NULL, p.published_at DESC, p.created_at DESC
             LIMIT ?2",
            POST_COLUMNS
        ))?;
        let posts = stmt
            .query_map(params![user_id.to_string(), limit as i64], |row| {
                Ok(PostView {
                    post: post_from_row(row)?,
                    feed_name: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    fn count_posts(&self) -> Result<i64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        Ok(count)
    }
}
