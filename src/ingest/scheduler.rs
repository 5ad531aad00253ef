//! The recurring aggregation loop.
//!
//! Every tick picks the least recently fetched feed (never-fetched feeds
//! first), stamps it as fetched, downloads and parses it, and stores each
//! item as a post. Stamping happens before the download so a slow or broken
//! feed cannot be picked again on the next tick and starve the others.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::{AppContext, GatorError, Result};
use crate::domain::Feed;
use crate::fetcher::fetch_channel;
use crate::fetcher::parallel::{ParallelFetcher, DEFAULT_WORKERS};
use crate::ingest::materializer;
use crate::normalizer::Channel;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub interval: Duration,
    /// Feeds refreshed per tick.
    pub batch_size: usize,
    /// Concurrent fetches when `batch_size` is above 1.
    pub workers: usize,
}

impl AggregatorConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            batch_size: 1,
            workers: DEFAULT_WORKERS,
        }
    }

    /// Builds a config from a duration string such as `"30s"` or `"1h30m"`.
    pub fn from_interval_str(s: &str) -> Result<Self> {
        Ok(Self::new(parse_interval(s)?))
    }
}

/// Parses a duration made of `<number><unit>` groups: `"1m"`, `"1h30m"`,
/// `"1.5s"`, `"250ms"`. Units are `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`.
/// The result must be longer than zero.
pub fn parse_interval(input: &str) -> Result<Duration> {
    let invalid = |reason: &str| GatorError::InvalidInterval {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let s = input.trim();
    if s.is_empty() {
        return Err(invalid("empty duration"));
    }
    if s.starts_with('-') {
        return Err(invalid("interval must be positive"));
    }
    let mut rest = s.strip_prefix('+').unwrap_or(s);

    let mut total_nanos = 0f64;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_end);
        if number.is_empty() || number == "." {
            return Err(invalid("expected a number"));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| invalid(&format!("malformed number {:?}", number)))?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);
        let nanos_per_unit = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(invalid(&format!("missing unit after {:?}", number))),
            other => return Err(invalid(&format!("unknown unit {:?}", other))),
        };

        total_nanos += value * nanos_per_unit;
        rest = next;
    }

    if total_nanos < 1.0 {
        return Err(invalid("interval must be positive"));
    }
    if total_nanos >= u64::MAX as f64 {
        return Err(invalid("interval too large"));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Format interval for display
pub fn format_interval(d: Duration) -> String {
    if d.subsec_nanos() != 0 {
        return format!("{:?}", d);
    }
    let secs = d.as_secs();
    if secs >= 3600 && secs.is_multiple_of(3600) {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Per-feed counts for one pass over a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub added: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Stored without a publish date.
    pub undated: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedOutcome {
    Ingested(IngestStats),
    /// Transport or parse failure. The feed's turn is still used up.
    FetchFailed(String),
    /// The feed could not be stamped, so it was not fetched.
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedReport {
    pub feed_id: Uuid,
    pub url: String,
    pub outcome: FeedOutcome,
}

/// What a tick did. Ticks never fail; problems are recorded here and logged.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub feeds: Vec<FeedReport>,
    /// Set when feed selection itself failed.
    pub error: Option<String>,
}

impl TickReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            feeds: Vec::new(),
            error: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.feeds.is_empty()
    }

    pub fn posts_added(&self) -> usize {
        self.feeds
            .iter()
            .map(|f| match &f.outcome {
                FeedOutcome::Ingested(stats) => stats.added,
                _ => 0,
            })
            .sum()
    }

    pub fn visited(&self) -> Vec<Uuid> {
        self.feeds.iter().map(|f| f.feed_id).collect()
    }
}

pub struct Aggregator {
    ctx: Arc<AppContext>,
    config: AggregatorConfig,
    parallel: ParallelFetcher,
}

impl Aggregator {
    pub fn new(ctx: Arc<AppContext>, config: AggregatorConfig) -> Self {
        let parallel = ParallelFetcher::with_workers(ctx.fetcher.clone(), config.workers);
        Self {
            ctx,
            config,
            parallel,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Runs until the process receives Ctrl-C.
    pub async fn run(&self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("could not listen for Ctrl-C, running until killed: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    }

    /// Ticks immediately, then once per interval, until `shutdown` resolves.
    /// A tick that overruns the interval delays the next one; ticks never overlap.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Collecting feeds every {} ({} per tick)",
            format_interval(self.config.interval),
            self.config.batch_size.max(1)
        );

        let mut timer = interval(self.config.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Aggregator shutting down");
                    break;
                }
                _ = timer.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One pass of select, stamp, fetch and store.
    pub async fn tick(&self) -> TickReport {
        // Stored timestamps keep microseconds; match them.
        let started_at = Utc::now().trunc_subsecs(6);
        let mut report = TickReport::new(started_at);

        let feeds = match self
            .ctx
            .store
            .next_feeds_to_fetch(self.config.batch_size.max(1))
        {
            Ok(feeds) => feeds,
            Err(e) => {
                error!("Failed to select next feed: {}", e);
                report.error = Some(e.to_string());
                return report;
            }
        };

        if feeds.is_empty() {
            debug!("No feeds to fetch");
            return report;
        }

        let mut marked = Vec::with_capacity(feeds.len());
        for feed in feeds {
            match self.ctx.store.mark_feed_fetched(feed.id, started_at) {
                Ok(()) => marked.push(feed),
                Err(e) => {
                    error!(feed = %feed.url, "Failed to mark feed fetched: {}", e);
                    report.feeds.push(FeedReport {
                        feed_id: feed.id,
                        url: feed.url,
                        outcome: FeedOutcome::Skipped(e.to_string()),
                    });
                }
            }
        }

        let fetched = self.fetch(&marked).await;

        for (feed, result) in marked.into_iter().zip(fetched) {
            let outcome = match result {
                Ok(channel) => FeedOutcome::Ingested(self.persist(&feed, channel)),
                Err(e) => {
                    warn!(feed = %feed.url, "Failed to fetch feed: {}", e);
                    FeedOutcome::FetchFailed(e.to_string())
                }
            };
            report.feeds.push(FeedReport {
                feed_id: feed.id,
                url: feed.url,
                outcome,
            });
        }

        info!(
            feeds = report.feeds.len(),
            added = report.posts_added(),
            "Tick complete"
        );
        report
    }

    async fn fetch(&self, feeds: &[Feed]) -> Vec<Result<Channel>> {
        if feeds.len() <= 1 {
            let mut results = Vec::with_capacity(feeds.len());
            for feed in feeds {
                results.push(
                    fetch_channel(self.ctx.fetcher.as_ref(), &self.ctx.normalizer, &feed.url).await,
                );
            }
            return results;
        }

        self.parallel
            .fetch_all(feeds, &self.ctx.normalizer)
            .await
            .into_iter()
            .map(|(_, result)| result)
            .collect()
    }

    fn persist(&self, feed: &Feed, channel: Channel) -> IngestStats {
        info!("Scraping feed {} ({} items)", channel.title, channel.items.len());
        let mut stats = IngestStats::default();

        for item in &channel.items {
            if item.link.is_empty() {
                warn!(feed = %feed.url, post = %item.title, "Skipping item without a link");
                stats.failed += 1;
                continue;
            }

            let draft = materializer::build(item, feed.id);
            let undated = draft.published_at.is_none();

            match self.ctx.store.insert_post(&draft) {
                Ok(post) => {
                    info!("Added post {}", post.display_title());
                    stats.added += 1;
                    if undated {
                        stats.undated += 1;
                    }
                }
                Err(GatorError::DuplicateLink(url)) => {
                    warn!(post = %item.title, "Skipping post already stored: {}", url);
                    stats.duplicates += 1;
                }
                Err(e) => {
                    warn!(post = %item.title, "Failed to insert post: {}", e);
                    stats.failed += 1;
                }
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::config::Config;
    use crate::fetcher::Fetcher;
    use crate::store::SqliteStore;

    /// Serves canned bodies by URL and remembers, per request, whether the
    /// feed had already been stamped when the request arrived.
    struct StubFetcher {
        store: Arc<SqliteStore>,
        routes: Mutex<HashMap<String, std::result::Result<String, String>>>,
        calls: Mutex<Vec<(String, bool)>>,
    }

    impl StubFetcher {
        fn new(store: Arc<SqliteStore>) -> Self {
            Self {
                store,
                routes: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn serve(&self, url: &str, body: String) {
            self.routes.lock().unwrap().insert(url.to_string(), Ok(body));
        }

        fn fail(&self, url: &str, message: &str) {
            self.routes
                .lock()
                .unwrap()
                .insert(url.to_string(), Err(message.to_string()));
        }

        fn calls(&self) -> Vec<(String, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            let stamped = self
                .store
                .get_feed_by_url(url)?
                .map(|f| f.last_fetched_at.is_some())
                .unwrap_or(false);
            self.calls.lock().unwrap().push((url.to_string(), stamped));

            match self.routes.lock().unwrap().get(url) {
                Some(Ok(body)) => Ok(body.clone().into_bytes()),
                Some(Err(message)) => Err(GatorError::Other(message.clone())),
                None => Err(GatorError::Other(format!("no route for {}", url))),
            }
        }
    }

    fn rss(items: &[(&str, &str, &str)]) -> String {
        let items: String = items
            .iter()
            .map(|(link, description, pub_date)| {
                format!(
                    "<item><title>Post {link}</title><link>{link}</link>\
                     <description>{description}</description><pubDate>{pub_date}</pubDate></item>"
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Test</title><link>https://a/</link><description>t</description>{}</channel></rss>"#,
            items
        )
    }

    fn setup(batch_size: usize) -> (Aggregator, Arc<SqliteStore>, Arc<StubFetcher>, Uuid) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let fetcher = Arc::new(StubFetcher::new(store.clone()));
        let ctx = AppContext::with_parts(store.clone(), fetcher.clone(), Config::default(), None);
        let user = store.create_user("alice").unwrap();

        let mut config = AggregatorConfig::new(Duration::from_millis(10));
        config.batch_size = batch_size;
        config.workers = 2;

        (Aggregator::new(Arc::new(ctx), config), store, fetcher, user.id)
    }

    const DATE: &str = "Mon, 01 Jan 2024 00:00:00 +0000";

    #[tokio::test]
    async fn test_second_tick_adds_nothing_but_restamps() {
        let (aggregator, store, fetcher, user_id) = setup(1);
        let feed = store.create_feed("A", "https://a/rss", user_id).unwrap();
        fetcher.serve(
            "https://a/rss",
            rss(&[("https://a/1", "one", DATE), ("https://a/2", "", DATE)]),
        );

        let first = aggregator.tick().await;
        assert_eq!(first.posts_added(), 2);
        assert_eq!(store.count_posts().unwrap(), 2);
        let first_stamp = store.get_feed(feed.id).unwrap().unwrap().last_fetched_at.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;

        let second = aggregator.tick().await;
        assert_eq!(second.posts_added(), 0);
        assert_eq!(
            second.feeds[0].outcome,
            FeedOutcome::Ingested(IngestStats {
                duplicates: 2,
                ..Default::default()
            })
        );
        assert_eq!(store.count_posts().unwrap(), 2);
        let second_stamp = store.get_feed(feed.id).unwrap().unwrap().last_fetched_at.unwrap();
        assert!(second_stamp > first_stamp);

        let empty = store.get_post_by_url("https://a/2").unwrap().unwrap();
        assert_eq!(empty.description, None);
    }

    #[tokio::test]
    async fn test_ticks_visit_feeds_oldest_first() {
        let (aggregator, store, fetcher, user_id) = setup(1);
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let mut by_age = Vec::new();
        for (i, minutes) in [20i64, 0, 10].iter().enumerate() {
            let url = format!("https://feed{}/rss", i);
            let feed = store.create_feed(&format!("f{}", i), &url, user_id).unwrap();
            store
                .mark_feed_fetched(feed.id, base + chrono::Duration::minutes(*minutes))
                .unwrap();
            fetcher.serve(&url, rss(&[]));
            by_age.push((*minutes, feed.id));
        }
        by_age.sort();

        let mut visited = Vec::new();
        for _ in 0..3 {
            visited.extend(aggregator.tick().await.visited());
        }
        let expected: Vec<Uuid> = by_age.into_iter().map(|(_, id)| id).collect();
        assert_eq!(visited, expected);

        // A brand new feed jumps the queue.
        let fresh = store.create_feed("new", "https://fresh/rss", user_id).unwrap();
        fetcher.serve("https://fresh/rss", rss(&[]));
        assert_eq!(aggregator.tick().await.visited(), vec![fresh.id]);
    }

    #[tokio::test]
    async fn test_failed_fetch_still_uses_up_turn() {
        let (aggregator, store, fetcher, user_id) = setup(1);
        let broken = store.create_feed("broken", "https://broken/rss", user_id).unwrap();
        let healthy = store.create_feed("ok", "https://ok/rss", user_id).unwrap();
        store
            .mark_feed_fetched(healthy.id, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .unwrap();
        fetcher.fail("https://broken/rss", "connection refused");
        fetcher.serve("https://ok/rss", rss(&[("https://ok/1", "x", DATE)]));

        let first = aggregator.tick().await;
        assert_eq!(first.visited(), vec![broken.id]);
        assert!(matches!(first.feeds[0].outcome, FeedOutcome::FetchFailed(_)));
        let stamp = store.get_feed(broken.id).unwrap().unwrap().last_fetched_at;
        assert_eq!(stamp, Some(first.started_at));

        let second = aggregator.tick().await;
        assert_eq!(second.visited(), vec![healthy.id]);
        assert_eq!(second.posts_added(), 1);

        // Every request saw its feed already stamped.
        assert!(fetcher.calls().iter().all(|(_, stamped)| *stamped));
    }

    #[tokio::test]
    async fn test_unparseable_date_is_still_stored() {
        let (aggregator, store, fetcher, user_id) = setup(1);
        store.create_feed("A", "https://a/rss", user_id).unwrap();
        fetcher.serve("https://a/rss", rss(&[("https://a/1", "body", "not-a-date")]));

        let report = aggregator.tick().await;
        assert_eq!(
            report.feeds[0].outcome,
            FeedOutcome::Ingested(IngestStats {
                added: 1,
                undated: 1,
                ..Default::default()
            })
        );

        let post = store.get_post_by_url("https://a/1").unwrap().unwrap();
        assert_eq!(post.published_at, None);
        assert_eq!(post.description.as_deref(), Some("body"));
    }

    #[tokio::test]
    async fn test_item_failures_do_not_stop_the_batch() {
        let (aggregator, store, fetcher, user_id) = setup(1);
        store.create_feed("A", "https://a/rss", user_id).unwrap();
        fetcher.serve(
            "https://a/rss",
            rss(&[
                ("https://a/1", "x", DATE),
                ("https://a/1", "again", DATE),
                ("", "no link", DATE),
                ("https://a/2", "y", DATE),
            ]),
        );

        let report = aggregator.tick().await;
        assert_eq!(
            report.feeds[0].outcome,
            FeedOutcome::Ingested(IngestStats {
                added: 2,
                duplicates: 1,
                failed: 1,
                undated: 0,
            })
        );
        assert_eq!(store.count_posts().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_malformed_document_is_a_fetch_failure() {
        let (aggregator, store, fetcher, user_id) = setup(1);
        store.create_feed("A", "https://a/rss", user_id).unwrap();
        fetcher.serve("https://a/rss", "<html>not a feed".to_string());

        let report = aggregator.tick().await;
        assert!(matches!(report.feeds[0].outcome, FeedOutcome::FetchFailed(_)));
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn test_empty_feed_table_is_a_no_op() {
        let (aggregator, _, fetcher, _) = setup(1);

        let report = aggregator.tick().await;
        assert!(report.is_idle());
        assert!(report.error.is_none());
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_batch_fetches_several_feeds_per_tick() {
        let (aggregator, store, fetcher, user_id) = setup(3);
        for i in 0..3 {
            let url = format!("https://feed{}/rss", i);
            store.create_feed(&format!("f{}", i), &url, user_id).unwrap();
            if i == 1 {
                fetcher.fail(&url, "timeout");
            } else {
                let link = format!("https://feed{}/post", i);
                fetcher.serve(&url, rss(&[(link.as_str(), "x", DATE)]));
            }
        }
        let last = store.create_feed("f3", "https://feed3/rss", user_id).unwrap();
        store
            .mark_feed_fetched(last.id, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .unwrap();

        let report = aggregator.tick().await;
        assert_eq!(report.feeds.len(), 3);
        assert_eq!(report.posts_added(), 2);
        assert!(fetcher.calls().iter().all(|(_, stamped)| *stamped));

        let stamped = store
            .list_feeds()
            .unwrap()
            .into_iter()
            .filter(|f| f.last_fetched_at == Some(report.started_at))
            .count();
        assert_eq!(stamped, 3);

        // The remaining feed is next.
        let next = aggregator.tick().await;
        assert_eq!(next.feeds[0].url, "https://feed3/rss");
    }

    #[tokio::test]
    async fn test_run_until_ticks_and_stops() {
        let (aggregator, store, fetcher, user_id) = setup(1);
        store.create_feed("A", "https://a/rss", user_id).unwrap();
        fetcher.serve("https://a/rss", rss(&[("https://a/1", "x", DATE)]));

        aggregator
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await;

        assert_eq!(store.count_posts().unwrap(), 1);
        assert!(fetcher.calls().len() >= 2);
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_interval("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_interval("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_interval("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_interval("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_interval("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_interval("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_interval(" 2m ").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn test_parse_interval_rejects_bad_input() {
        for bad in ["", "abc", "10", "5x", "0s", "0", "-1m", "1..5s", "m"] {
            let err = parse_interval(bad).unwrap_err();
            assert!(
                matches!(err, GatorError::InvalidInterval { .. }),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(Duration::from_secs(3600)), "1h");
        assert_eq!(format_interval(Duration::from_secs(1800)), "30m");
        assert_eq!(format_interval(Duration::from_secs(90)), "90s");
        assert_eq!(format_interval(Duration::from_millis(1500)), "1.5s");
    }
}
