use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::app::{GatorError, Result};
use crate::domain::Feed;
use crate::fetcher::{fetch_channel, Fetcher};
use crate::normalizer::{Channel, Normalizer};

pub const DEFAULT_WORKERS: usize = 4;

/// Fetches several feeds at once, at most `workers` in flight.
pub struct ParallelFetcher {
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    semaphore: Arc<Semaphore>,
}

impl ParallelFetcher {
    pub fn new(fetcher: Arc<dyn Fetcher + Send + Sync>) -> Self {
        Self::with_workers(fetcher, DEFAULT_WORKERS)
    }

    pub fn with_workers(fetcher: Arc<dyn Fetcher + Send + Sync>, workers: usize) -> Self {
        Self {
            fetcher,
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Results come back in the same order as `feeds`.
    pub async fn fetch_all(
        &self,
        feeds: &[Feed],
        normalizer: &Normalizer,
    ) -> Vec<(Uuid, Result<Channel>)> {
        let handles = feeds.iter().map(|feed| {
            let fetcher = self.fetcher.clone();
            let semaphore = self.semaphore.clone();
            let normalizer = normalizer.clone();
            let url = feed.url.clone();

            tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| GatorError::Other(format!("worker pool closed: {}", e)))?;
                fetch_channel(fetcher.as_ref(), &normalizer, &url).await
            })
        });

        let joined = join_all(handles).await;

        feeds
            .iter()
            .zip(joined)
            .map(|(feed, joined)| {
                let result = joined.unwrap_or_else(|e| {
                    tracing::error!(feed = %feed.url, "fetch task failed: {}", e);
                    Err(GatorError::Other(format!("fetch task failed: {}", e)))
                });
                (feed.id, result)
            })
            .collect()
    }
}
