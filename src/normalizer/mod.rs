use std::io::Cursor;

use feed_rs::parser;
use html_escape::decode_html_entities;

use crate::app::{GatorError, Result};

/// A parsed syndication document.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub title: String,
    pub items: Vec<ChannelItem>,
}

/// One entry of a channel, in document order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelItem {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Raw date string as published. Validated later, when building the post.
    pub pub_date: String,
}

#[derive(Clone)]
pub struct Normalizer;

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Parses an RSS 2.0 document, falling back to Atom, RSS 1.0 and JSON Feed.
    pub fn normalize(&self, body: &[u8]) -> Result<Channel> {
        match rss::Channel::read_from(Cursor::new(body)) {
            Ok(channel) => Ok(Self::from_rss(channel)),
            Err(rss_err) => {
                tracing::debug!(error = %rss_err, "not an RSS 2.0 document, trying other formats");
                Self::from_other_formats(body)
            }
        }
    }

    fn from_rss(channel: rss::Channel) -> Channel {
        let items = channel
            .items()
            .iter()
            .map(|item| ChannelItem {
                title: decode(item.title().unwrap_or_default()),
                link: item.link().unwrap_or_default().trim().to_string(),
                description: decode(item.description().unwrap_or_default()),
                pub_date: item.pub_date().unwrap_or_default().trim().to_string(),
            })
            .collect();

        Channel {
            title: decode(channel.title()),
            items,
        }
    }

    fn from_other_formats(body: &[u8]) -> Result<Channel> {
        let feed = parser::parse(body).map_err(|e| GatorError::FeedParse(e.to_string()))?;

        let items = feed
            .entries
            .into_iter()
            .map(|entry| ChannelItem {
                title: entry
                    .title
                    .map(|t| decode(&t.content))
                    .unwrap_or_default(),
                link: entry
                    .links
                    .first()
                    .map(|l| l.href.trim().to_string())
                    .unwrap_or_default(),
                description: entry
                    .summary
                    .map(|s| decode(&s.content))
                    .or_else(|| entry.content.and_then(|c| c.body).map(|b| decode(&b)))
                    .unwrap_or_default(),
                // Same shape as an RSS pubDate so every format takes one parsing path.
                pub_date: entry
                    .published
                    .or(entry.updated)
                    .map(|dt| dt.to_rfc2822())
                    .unwrap_or_default(),
            })
            .collect();

        Ok(Channel {
            title: feed.title.map(|t| decode(&t.content)).unwrap_or_default(),
            items,
        })
    }
}

// Runs after XML unescaping, so doubly escaped markup such as `&amp;lt;b&amp;gt;` becomes `<b>`.
fn decode(s: &str) -> String {
    decode_html_entities(s.trim()).to_string()
}
