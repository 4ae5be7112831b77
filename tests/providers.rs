//! HTTP-level tests for the quote and news clients against a wiremock server.

use findash::error::AppError;
use findash::fetcher::{http_client, NewsApiClient, NewsFetcher, QuoteFetcher, YahooChartClient};
use findash::types::{BarInterval, NewsOutcome, Period};
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn quotes(server: &MockServer) -> YahooChartClient {
    YahooChartClient::new(http_client(5).unwrap(), server.uri())
}

fn news(server: &MockServer, key: Option<&str>) -> NewsApiClient {
    NewsApiClient::new(http_client(5).unwrap(), server.uri(), key.map(str::to_string))
}

#[tokio::test]
async fn quote_history_is_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .and(query_param("range", "1mo"))
        .and(query_param("interval", "1d"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "chart": {
                "result": [{
                    "timestamp": [1704153600],
                    "indicators": { "quote": [{
                        "open": [100.0], "high": [105.0], "low": [95.0],
                        "close": [102.0], "volume": [1000000]
                    }]}
                }],
                "error": null
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let bars = quotes(&server)
        .fetch_history("AAPL", Period::OneMonth, BarInterval::OneDay)
        .await
        .unwrap();
    assert_eq!(bars.len(), 1);
    assert_eq!(bars[0].close, Some(102.0));
    assert_eq!(bars[0].timestamp.to_string(), "2024-01-02 00:00:00");
}

#[tokio::test]
async fn unknown_ticker_is_empty_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/ZZZZ"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "chart": {
                "result": null,
                "error": { "code": "Not Found", "description": "No data found, symbol may be delisted" }
            }
        })))
        .mount(&server)
        .await;

    let bars = quotes(&server)
        .fetch_history("ZZZZ", Period::OneYear, BarInterval::OneDay)
        .await
        .unwrap();
    assert!(bars.is_empty());
}

#[tokio::test]
async fn server_error_is_a_fetch_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let err = quotes(&server)
        .fetch_history("AAPL", Period::OneYear, BarInterval::OneDay)
        .await
        .unwrap_err();
    assert!(err.is_fetch_failure(), "{err}");
}

#[tokio::test]
async fn malformed_quote_payload_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>rate limited</html>"))
        .mount(&server)
        .await;

    let err = quotes(&server)
        .fetch_history("AAPL", Period::OneYear, BarInterval::OneDay)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Json(_)));
}

#[tokio::test]
async fn news_sends_key_and_clamps_page_size() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/everything"))
        .and(header("X-Api-Key", "secret"))
        .and(query_param("q", "Tesla"))
        .and(query_param("pageSize", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok",
            "totalResults": 1,
            "articles": [{
                "source": { "id": null, "name": "Reuters" },
                "title": "Tesla deliveries rise",
                "description": "Q3 numbers",
                "url": "https://example.com/tsla"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = news(&server, Some("secret")).fetch_news("Tesla", 100).await.unwrap();
    match outcome {
        NewsOutcome::Articles { articles } => {
            assert_eq!(articles.len(), 1);
            assert_eq!(articles[0].source.as_deref(), Some("Reuters"));
        }
        other => panic!("expected articles, got {other:?}"),
    }
}

#[tokio::test]
async fn no_articles_is_an_error_object() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/everything"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok", "totalResults": 0, "articles": []
        })))
        .mount(&server)
        .await;

    let outcome = news(&server, Some("secret")).fetch_news("nothing", 5).await.unwrap();
    assert_eq!(
        serde_json::to_value(outcome).unwrap(),
        serde_json::json!({ "error": "No news found for this query." })
    );
}

#[tokio::test]
async fn rejected_key_is_a_fetch_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "status": "error", "code": "apiKeyInvalid", "message": "Your API key is invalid."
        })))
        .mount(&server)
        .await;

    let err = news(&server, Some("bad")).fetch_news("Apple", 5).await.unwrap_err();
    assert!(err.is_fetch_failure());
    assert!(err.to_string().contains("API key is invalid"));
}
