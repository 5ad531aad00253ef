use std::sync::Arc;

use url::Url;

use crate::app::{AppContext, GatorError, Result};
use crate::cli::Commands;
use crate::domain::{Feed, FeedFollowView, PostView, User};
use crate::ingest::{Aggregator, AggregatorConfig};
use crate::store::Store;

/// Runs one command against `ctx`.
pub async fn dispatch(mut ctx: AppContext, command: Commands) -> Result<()> {
    match command {
        Commands::Register { name } => register(&mut ctx, &name).map(drop),
        Commands::Login { name } => login(&mut ctx, &name).map(drop),
        Commands::Users => list_users(&ctx).map(drop),
        Commands::StartAggregator {
            interval,
            batch_size,
            workers,
        } => start_aggregator(Arc::new(ctx), &interval, batch_size, workers).await,
        Commands::Feeds => list_feeds(&ctx).map(drop),
        Commands::Reset => reset(&ctx).map(drop),
        Commands::AddFeed { name, url } => {
            with_user(&ctx, |ctx, user| add_feed(ctx, user, &name, &url)).map(drop)
        }
        Commands::Follow { url } => with_user(&ctx, |ctx, user| follow(ctx, user, &url)).map(drop),
        Commands::Following => with_user(&ctx, following).map(drop),
        Commands::Unfollow { url } => with_user(&ctx, |ctx, user| unfollow(ctx, user, &url)),
        Commands::Browse { limit } => {
            with_user(&ctx, |ctx, user| browse(ctx, user, limit)).map(drop)
        }
    }
}

/// Resolves the logged-in user from the context.
pub fn require_user(ctx: &AppContext) -> Result<User> {
    let name = ctx.current_user_name().ok_or(GatorError::NotLoggedIn)?;
    ctx.store
        .get_user_by_name(name)?
        .ok_or_else(|| GatorError::UserNotFound(name.to_string()))
}

/// Runs `handler` as the logged-in user.
pub fn with_user<T, F>(ctx: &AppContext, handler: F) -> Result<T>
where
    F: FnOnce(&AppContext, &User) -> Result<T>,
{
    let user = require_user(ctx)?;
    handler(ctx, &user)
}

pub fn register(ctx: &mut AppContext, name: &str) -> Result<User> {
    let user = ctx.store.create_user(name)?;
    ctx.set_current_user(&user.name)?;
    println!("User {} created and logged in", user.name);
    Ok(user)
}

pub fn login(ctx: &mut AppContext, name: &str) -> Result<User> {
    let user = ctx
        .store
        .get_user_by_name(name)?
        .ok_or_else(|| GatorError::UserNotFound(name.to_string()))?;
    ctx.set_current_user(&user.name)?;
    println!("Logged in as {}", user.name);
    Ok(user)
}

pub fn list_users(ctx: &AppContext) -> Result<Vec<User>> {
    let users = ctx.store.list_users()?;

    if users.is_empty() {
        println!("No users");
        return Ok(users);
    }

    for user in &users {
        if Some(user.name.as_str()) == ctx.current_user_name() {
            println!("* {} (current)", user.name);
        } else {
            println!("* {}", user.name);
        }
    }

    Ok(users)
}

pub async fn start_aggregator(
    ctx: Arc<AppContext>,
    interval: &str,
    batch_size: Option<usize>,
    workers: Option<usize>,
) -> Result<()> {
    let mut config = AggregatorConfig::from_interval_str(interval)?;
    config.batch_size = batch_size.unwrap_or(ctx.config.aggregator.batch_size);
    config.workers = workers.unwrap_or(ctx.config.aggregator.workers);

    Aggregator::new(ctx, config).run().await;
    Ok(())
}

pub fn add_feed(ctx: &AppContext, user: &User, name: &str, url: &str) -> Result<Feed> {
    Url::parse(url)?;

    let feed = ctx.store.create_feed(name, url, user.id)?;
    println!("Added feed: {} ({})", feed.name, feed.url);

    let follow = ctx.store.create_feed_follow(user.id, feed.id)?;
    println!("{} is now following {}", follow.user_name, follow.feed_name);

    Ok(feed)
}

pub fn list_feeds(ctx: &AppContext) -> Result<Vec<(Feed, String)>> {
    let feeds = ctx.store.list_feeds()?;

    if feeds.is_empty() {
        println!("No feeds");
        return Ok(Vec::new());
    }

    let mut listed = Vec::with_capacity(feeds.len());
    for feed in feeds {
        let owner = ctx
            .store
            .get_user(feed.user_id)?
            .map(|u| u.name)
            .unwrap_or_else(|| "(unknown)".to_string());

        let fetched = feed
            .last_fetched_at
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());

        println!(
            "{}\n  {}\n  added by {}, last fetched {}",
            feed.display_title(),
            feed.url,
            owner,
            fetched
        );
        listed.push((feed, owner));
    }

    Ok(listed)
}

pub fn follow(ctx: &AppContext, user: &User, url: &str) -> Result<FeedFollowView> {
    let feed = ctx
        .store
        .get_feed_by_url(url)?
        .ok_or_else(|| GatorError::FeedNotFound(url.to_string()))?;

    let view = ctx
        .store
        .create_feed_follow(user.id, feed.id)
        .map_err(|e| match e {
            GatorError::DuplicateFollow(_) => GatorError::DuplicateFollow(url.to_string()),
            other => other,
        })?;

    println!("{} is now following {}", view.user_name, view.feed_name);
    Ok(view)
}

pub fn following(ctx: &AppContext, user: &User) -> Result<Vec<FeedFollowView>> {
    let follows = ctx.store.list_follows_for_user(user.id)?;

    if follows.is_empty() {
        println!("{} is not following any feeds", user.name);
        return Ok(follows);
    }

    println!("{} is following:", user.name);
    for follow in &follows {
        println!("  - {}", follow.feed_name);
    }

    Ok(follows)
}

pub fn unfollow(ctx: &AppContext, user: &User, url: &str) -> Result<()> {
    let feed = ctx
        .store
        .get_feed_by_url(url)?
        .ok_or_else(|| GatorError::FeedNotFound(url.to_string()))?;

    if !ctx.store.delete_feed_follow(user.id, feed.id)? {
        return Err(GatorError::NotFollowing(url.to_string()));
    }

    println!("{} is no longer following {}", user.name, feed.display_title());
    Ok(())
}

pub fn browse(ctx: &AppContext, user: &User, limit: usize) -> Result<Vec<PostView>> {
    let posts = ctx.store.list_posts_for_user(user.id, limit)?;

    if posts.is_empty() {
        println!("No posts yet. Follow some feeds and run the aggregator.");
        return Ok(posts);
    }

    for view in &posts {
        let date = view
            .post
            .published_at
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "          ".to_string());

        println!("{} [{}] {}", date, view.feed_name, view.post.display_title());
        println!("    {}", view.post.url);
        if let Some(description) = &view.post.description {
            println!("    {}", description);
        }
    }

    Ok(posts)
}

pub fn reset(ctx: &AppContext) -> Result<usize> {
    let removed = ctx.store.delete_all_users()?;
    println!("Reset complete: removed {} users and their feeds", removed);
    Ok(removed)
}
