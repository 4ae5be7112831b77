//! Market data providers. Both sit behind traits so the refresh loop and
//! the HTTP handlers can be driven by stubs in tests.

mod news;
mod quotes;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BarInterval, NewsOutcome, OhlcvBar, Period};

pub use news::NewsApiClient;
pub use quotes::YahooChartClient;

#[async_trait]
pub trait QuoteFetcher: Send + Sync {
    /// Historical bars for `ticker`, oldest first.
    /// An unknown ticker yields `Ok(vec![])`, never an error.
    async fn fetch_history(
        &self,
        ticker: &str,
        period: Period,
        interval: BarInterval,
    ) -> Result<Vec<OhlcvBar>>;
}

#[async_trait]
pub trait NewsFetcher: Send + Sync {
    /// Up to `limit` articles (clamped to 1..=20) matching `query`.
    async fn fetch_news(&self, query: &str, limit: usize) -> Result<NewsOutcome>;
}

pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("findash/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}
