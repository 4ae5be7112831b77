use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::NewsFetcher;
use crate::config::MAX_NEWS_LIMIT;
use crate::error::{AppError, Result};
use crate::types::{Article, NewsOutcome};

pub const NO_NEWS_MESSAGE: &str = "No news found for this query.";

/// Client for the NewsAPI `/v2/everything` search.
#[derive(Clone)]
pub struct NewsApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl NewsApiClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self { client, base_url: base_url.into(), api_key }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    status: String,
    message: Option<String>,
    #[serde(default)]
    articles: Vec<WireArticle>,
}

#[derive(Debug, Deserialize)]
struct WireArticle {
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    source: Option<WireSource>,
}

#[derive(Debug, Deserialize)]
struct WireSource {
    name: Option<String>,
}

impl From<WireArticle> for Article {
    fn from(a: WireArticle) -> Self {
        Article {
            title: a.title,
            description: a.description,
            url: a.url,
            source: a.source.and_then(|s| s.name),
        }
    }
}

pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_NEWS_LIMIT)
}

fn to_outcome(resp: SearchResponse, limit: usize) -> Result<NewsOutcome> {
    if resp.status != "ok" {
        return Err(AppError::Fetch(format!(
            "news provider error: {}",
            resp.message.unwrap_or(resp.status)
        )));
    }
    if resp.articles.is_empty() {
        return Ok(NewsOutcome::Error { error: NO_NEWS_MESSAGE.to_string() });
    }
    let articles = resp.articles.into_iter().take(limit).map(Article::from).collect();
    Ok(NewsOutcome::Articles { articles })
}

#[async_trait]
impl NewsFetcher for NewsApiClient {
    async fn fetch_news(&self, query: &str, limit: usize) -> Result<NewsOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidInput("news query must not be empty".to_string()));
        }
        let Some(key) = self.api_key.as_deref() else {
            return Err(AppError::Config("NEWS_API_KEY is not set".to_string()));
        };
        let limit = clamp_limit(limit);

        let url = format!("{}/v2/everything", self.base_url.trim_end_matches('/'));
        let page_size = limit.to_string();
        let resp = self
            .client
            .get(&url)
            .header("X-Api-Key", key)
            .query(&[("q", query), ("pageSize", page_size.as_str()), ("language", "en")])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        // Error bodies carry {"status":"error","message":...}; prefer that message.
        let parsed = serde_json::from_str::<SearchResponse>(&body);
        let outcome = match parsed {
            Ok(r) => to_outcome(r, limit)?,
            Err(_) if !status.is_success() => {
                return Err(AppError::Fetch(format!("news provider returned {status}")));
            }
            Err(e) => return Err(e.into()),
        };

        debug!(query, limit, error = outcome.is_error(), "Fetched news");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(title: &str) -> WireArticle {
        WireArticle {
            title: Some(title.to_string()),
            description: None,
            url: Some(format!("https://news.example/{title}")),
            source: Some(WireSource { name: Some("Wire".to_string()) }),
        }
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(5), 5);
        assert_eq!(clamp_limit(500), 20);
    }

    #[test]
    fn zero_articles_is_an_explicit_error_object() {
        let resp = SearchResponse { status: "ok".into(), message: None, articles: vec![] };
        assert_eq!(
            to_outcome(resp, 5).unwrap(),
            NewsOutcome::Error { error: NO_NEWS_MESSAGE.to_string() }
        );
    }

    #[test]
    fn articles_are_truncated_to_limit() {
        let resp = SearchResponse {
            status: "ok".into(),
            message: None,
            articles: vec![article("a"), article("b"), article("c")],
        };
        match to_outcome(resp, 2).unwrap() {
            NewsOutcome::Articles { articles } => {
                assert_eq!(articles.len(), 2);
                assert_eq!(articles[0].source.as_deref(), Some("Wire"));
            }
            other => panic!("expected articles, got {other:?}"),
        }
    }

    #[test]
    fn provider_error_status_is_a_fetch_failure() {
        let resp = SearchResponse {
            status: "error".into(),
            message: Some("Your API key is invalid".into()),
            articles: vec![],
        };
        let err = to_outcome(resp, 5).unwrap_err();
        assert!(err.is_fetch_failure());
        assert!(err.to_string().contains("invalid"));
    }

    #[tokio::test]
    async fn missing_key_is_a_config_error() {
        let c = NewsApiClient::new(reqwest::Client::new(), "http://localhost:1", None);
        assert!(matches!(c.fetch_news("apple", 5).await, Err(AppError::Config(_))));
    }
}
