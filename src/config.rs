use crate::error::{AppError, Result};
use crate::types::{CoercionMode, Period};

pub const QUOTE_API_URL: &str = "https://query1.finance.yahoo.com";
pub const NEWS_API_URL: &str = "https://newsapi.org";

/// Shortest allowed refresh interval (minutes).
pub const MIN_REFRESH_INTERVAL_MINUTES: u64 = 10;

/// Longest allowed refresh interval (one week, in minutes).
pub const MAX_REFRESH_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Upper bound on articles returned by a single news query.
pub const MAX_NEWS_LIMIT: usize = 20;

/// Default article count when the caller does not ask for one.
pub const DEFAULT_NEWS_LIMIT: usize = 5;

/// Default row limits for the "most recent N" reads.
pub const DEFAULT_RECENT_RECORDS: i64 = 100;
pub const DEFAULT_TICKER_RECORDS: i64 = 10;
pub const DEFAULT_RECENT_REPORTS: i64 = 5;
pub const DEFAULT_RECENT_SOURCE_FILES: i64 = 20;

/// Hard cap on any limit query parameter.
pub const MAX_QUERY_LIMIT: i64 = 5_000;

/// Characters of extracted text echoed back in an upload response.
pub const TEXT_PREVIEW_CHARS: usize = 3_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub quote_api_url: String,
    pub news_api_url: String,
    /// NewsAPI key (NEWS_API_KEY). News routes fail with a config error without it.
    pub news_api_key: Option<String>,
    /// Numeric coercion policy for the normalizer (COERCION_MODE = lenient | strict)
    pub coercion_mode: CoercionMode,
    /// Tickers refreshed from startup (REFRESH_TICKERS, comma-separated).
    /// Empty means the loop stays idle until started over HTTP.
    pub refresh_tickers: Vec<String>,
    pub refresh_interval_minutes: u64,
    /// History window pulled on every refresh tick (REFRESH_PERIOD)
    pub refresh_period: Period,
    pub http_timeout_secs: u64,
    pub max_upload_bytes: usize,
    pub summary_sentences: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let coercion_mode = std::env::var("COERCION_MODE")
            .unwrap_or_else(|_| "lenient".to_string())
            .parse::<CoercionMode>()
            .map_err(AppError::Config)?;

        let refresh_period = std::env::var("REFRESH_PERIOD")
            .unwrap_or_else(|_| "1mo".to_string())
            .parse::<Period>()
            .map_err(AppError::Config)?;

        let refresh_interval_minutes = std::env::var("REFRESH_INTERVAL_MINUTES")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .map_err(|_| {
                AppError::Config("REFRESH_INTERVAL_MINUTES must be a whole number".to_string())
            })?;
        if !(MIN_REFRESH_INTERVAL_MINUTES..=MAX_REFRESH_INTERVAL_MINUTES)
            .contains(&refresh_interval_minutes)
        {
            return Err(AppError::Config(format!(
                "REFRESH_INTERVAL_MINUTES must be between {MIN_REFRESH_INTERVAL_MINUTES} and {MAX_REFRESH_INTERVAL_MINUTES}"
            )));
        }

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "findash.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            quote_api_url: std::env::var("QUOTE_API_URL")
                .unwrap_or_else(|_| QUOTE_API_URL.to_string()),
            news_api_url: std::env::var("NEWS_API_URL")
                .unwrap_or_else(|_| NEWS_API_URL.to_string()),
            news_api_key: std::env::var("NEWS_API_KEY")
                .ok()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            coercion_mode,
            refresh_tickers: parse_ticker_list(&std::env::var("REFRESH_TICKERS").unwrap_or_default()),
            refresh_interval_minutes,
            refresh_period,
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<u64>()
                .unwrap_or(30),
            max_upload_bytes: std::env::var("MAX_UPLOAD_MB")
                .unwrap_or_else(|_| "25".to_string())
                .parse::<usize>()
                .unwrap_or(25)
                * 1024
                * 1024,
            summary_sentences: std::env::var("SUMMARY_SENTENCES")
                .unwrap_or_else(|_| "3".to_string())
                .parse::<usize>()
                .unwrap_or(3)
                .max(1),
        })
    }
}

/// Split a comma-separated ticker list, trimming and upper-casing entries.
pub fn parse_ticker_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_list_drops_blanks_and_normalizes_case() {
        assert_eq!(parse_ticker_list(" aapl, MSFT ,,tcs.ns "), vec!["AAPL", "MSFT", "TCS.NS"]);
        assert!(parse_ticker_list("").is_empty());
    }
}
