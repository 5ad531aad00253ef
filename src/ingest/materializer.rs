//! Turns channel items into post drafts ready for insertion.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::PostDraft;
use crate::normalizer::ChannelItem;

/// RFC 1123 with a numeric zone, minus the weekday.
const RFC1123Z_NO_WEEKDAY: &str = "%d %b %Y %H:%M:%S %z";

/// Builds a draft post for `item`. Never fails: fields that cannot be
/// used are left empty and reported as warnings.
pub fn build(item: &ChannelItem, feed_id: Uuid) -> PostDraft {
    let description = if item.description.trim().is_empty() {
        None
    } else {
        Some(item.description.clone())
    };

    let published_at = match parse_pub_date(&item.pub_date) {
        Some(dt) => Some(dt),
        None => {
            tracing::warn!(
                post = %item.title,
                pub_date = %item.pub_date,
                "could not parse publish date, storing post without one"
            );
            None
        }
    };

    let now = Utc::now();
    PostDraft {
        id: Uuid::new_v4(),
        title: item.title.clone(),
        url: item.link.clone(),
        description,
        published_at,
        feed_id,
        created_at: now,
        updated_at: now,
    }
}

/// Parses an RSS publish date. Named zones such as `GMT` are accepted too.
///
/// The weekday name must be well formed but is not checked against the
/// date; feeds often get it wrong.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let rest = strip_weekday(raw)?;
    DateTime::parse_from_str(rest, RFC1123Z_NO_WEEKDAY)
        .or_else(|_| DateTime::parse_from_rfc2822(rest))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Drops a leading `Www, `. Returns `None` when the prefix is malformed.
fn strip_weekday(raw: &str) -> Option<&str> {
    match raw.split_once(',') {
        Some((day, rest)) => {
            let day = day.trim();
            let well_formed = day.len() == 3 && day.chars().all(|c| c.is_ascii_alphabetic());
            well_formed.then(|| rest.trim_start())
        }
        None => Some(raw),
    }
}
