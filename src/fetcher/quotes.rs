use async_trait::async_trait;
use chrono::DateTime;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::QuoteFetcher;
use crate::error::{AppError, Result};
use crate::types::{BarInterval, OhlcvBar, Period};

/// Client for the Yahoo Finance v8 chart endpoint.
#[derive(Clone)]
pub struct YahooChartClient {
    client: reqwest::Client,
    base_url: String,
}

impl YahooChartClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into() }
    }

    fn chart_url(&self, ticker: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| AppError::Config(format!("invalid QUOTE_API_URL '{}': {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config(format!("QUOTE_API_URL '{}' cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", ticker]);
        Ok(url)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

fn is_not_found(error: &ChartError) -> bool {
    error.code.as_deref() == Some("Not Found")
}

fn value_at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

fn to_bars(result: ChartResult) -> Vec<OhlcvBar> {
    let series = result.indicators.quote.into_iter().next().unwrap_or_default();
    result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            let timestamp = DateTime::from_timestamp(ts, 0)?.naive_utc();
            Some(OhlcvBar {
                timestamp,
                open: value_at(&series.open, i),
                high: value_at(&series.high, i),
                low: value_at(&series.low, i),
                close: value_at(&series.close, i),
                volume: value_at(&series.volume, i),
            })
        })
        .collect()
}

pub(crate) fn parse_chart(body: &str) -> Result<Vec<OhlcvBar>> {
    let envelope: ChartEnvelope = serde_json::from_str(body)?;
    if let Some(err) = envelope.chart.error {
        if is_not_found(&err) {
            return Ok(Vec::new());
        }
        return Err(AppError::Fetch(format!(
            "quote provider error: {}",
            err.description.or(err.code).unwrap_or_else(|| "unknown".to_string())
        )));
    }
    Ok(envelope
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .map(to_bars)
        .unwrap_or_default())
}

#[async_trait]
impl QuoteFetcher for YahooChartClient {
    async fn fetch_history(
        &self,
        ticker: &str,
        period: Period,
        interval: BarInterval,
    ) -> Result<Vec<OhlcvBar>> {
        let ticker = ticker.trim();
        if ticker.is_empty() {
            return Err(AppError::InvalidInput("ticker must not be empty".to_string()));
        }

        let resp = self
            .client
            .get(self.chart_url(ticker)?)
            .query(&[("range", period.as_str()), ("interval", interval.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!(ticker, "Quote provider has no data for ticker");
            return Ok(Vec::new());
        }
        let body = resp.text().await?;
        if !status.is_success() {
            // Some unknown symbols come back as a non-404 with a "Not Found" error body.
            if let Ok(ChartEnvelope { chart: Chart { error: Some(err), .. } }) =
                serde_json::from_str::<ChartEnvelope>(&body)
            {
                if is_not_found(&err) {
                    return Ok(Vec::new());
                }
            }
            return Err(AppError::Fetch(format!("quote provider returned {status} for {ticker}")));
        }

        let bars = parse_chart(&body)?;
        debug!(ticker, bars = bars.len(), %period, %interval, "Fetched quote history");
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bars_with_null_fields() {
        let body = r#"{"chart":{"result":[{"timestamp":[1704153600,1704240000],
            "indicators":{"quote":[{"open":[100.0,null],"high":[105.0,106.0],
            "low":[95.0,96.0],"close":[102.0,103.0],"volume":[1000000,null]}]}}],"error":null}}"#;
        let bars = parse_chart(body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp.to_string(), "2024-01-02 00:00:00");
        assert_eq!(bars[0].volume, Some(1_000_000.0));
        assert_eq!(bars[1].open, None);
        assert_eq!(bars[1].volume, None);
    }

    #[test]
    fn not_found_error_is_empty() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        assert!(parse_chart(body).unwrap().is_empty());
    }

    #[test]
    fn other_provider_error_is_a_fetch_failure() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Bad Request","description":"Invalid input - interval=7m is not supported"}}}"#;
        assert!(parse_chart(body).unwrap_err().is_fetch_failure());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(matches!(parse_chart("<html>"), Err(AppError::Json(_))));
    }

    #[test]
    fn result_without_timestamps_is_empty() {
        let body = r#"{"chart":{"result":[{"indicators":{"quote":[{}]}}],"error":null}}"#;
        assert!(parse_chart(body).unwrap().is_empty());
    }

    #[test]
    fn chart_url_appends_escaped_ticker() {
        let c = YahooChartClient::new(reqwest::Client::new(), "http://localhost:1/");
        assert_eq!(c.chart_url("TCS.NS").unwrap().path(), "/v8/finance/chart/TCS.NS");
        assert_eq!(c.chart_url("A/B").unwrap().path(), "/v8/finance/chart/A%2FB");
    }
}
