//! # Gator
//!
//! A multi-user RSS feed aggregator backed by SQLite.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler → Fetcher → Normalizer → Materializer → Store
//! ```
//!
//! - [`ingest`]: freshness-ordered scheduler and post materializer
//! - [`fetcher`]: HTTP client and bounded parallel fetching
//! - [`normalizer`]: Converts RSS (and Atom as a fallback) into channels
//! - [`store`]: SQLite persistence for users, feeds, follows and posts
//!
//! ## Quick Start
//!
//! ```bash
//! gator register alice
//! gator addfeed "Rust Blog" https://blog.rust-lang.org/feed.xml
//! gator start-aggregator 1m
//! gator browse 10
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the store,
/// fetcher, normalizer and loaded configuration.
pub mod app;

/// Command-line interface using clap.
pub mod cli;

/// Configuration management.
///
/// Loads from `~/.config/gator/config.toml`, which also records the
/// logged-in user.
pub mod config;

/// Core domain models: users, feeds, follows and posts.
pub mod domain;

/// Feed fetching.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for feed fetching
/// - [`HttpFetcher`](fetcher::http_fetcher::HttpFetcher): reqwest-based implementation
/// - [`ParallelFetcher`](fetcher::parallel::ParallelFetcher): Concurrent fetching with semaphore
pub mod fetcher;

/// Ingestion: turning fetched channels into stored posts on a schedule.
pub mod ingest;

/// Feed parsing and normalization.
pub mod normalizer;

/// SQLite persistence layer.
///
/// - [`Store`](store::Store): Trait defining storage operations
/// - [`SqliteStore`](store::sqlite::SqliteStore): SQLite implementation
pub mod store;
