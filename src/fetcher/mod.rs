pub mod http_fetcher;
pub mod parallel;

use async_trait::async_trait;

use crate::app::Result;
use crate::normalizer::{Channel, Normalizer};

#[async_trait]
pub trait Fetcher {
    /// Retrieves the raw document at `url`. Non-success statuses are errors.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Fetches `url` and parses it into a [`Channel`].
pub async fn fetch_channel(
    fetcher: &(dyn Fetcher + Send + Sync),
    normalizer: &Normalizer,
    url: &str,
) -> Result<Channel> {
    let body = fetcher.fetch(url).await?;
    normalizer.normalize(&body)
}
