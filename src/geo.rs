use crate::types::FinancialRecord;

/// Fallback coordinate for tickers without a known headquarters (San Francisco).
pub const DEFAULT_LOCATION: &str = "37.7749,-122.4194";

const COMPANY_LOCATIONS: &[(&str, &str)] = &[
    ("AAPL", "37.3349,-122.0090"),
    ("MSFT", "47.6426,-122.1396"),
    ("GOOGL", "37.4220,-122.0841"),
    ("AMZN", "47.6225,-122.3365"),
    ("TSLA", "37.3947,-122.1503"),
    ("META", "37.4845,-122.1477"),
    ("TCS.NS", "19.0760,72.8777"),
];

/// "lat,lon" for a ticker. Pure lookup; unknown tickers get [`DEFAULT_LOCATION`].
pub fn location_for(ticker: &str) -> &'static str {
    let ticker = ticker.trim();
    COMPANY_LOCATIONS
        .iter()
        .find(|(t, _)| t.eq_ignore_ascii_case(ticker))
        .map(|(_, loc)| *loc)
        .unwrap_or(DEFAULT_LOCATION)
}

/// Give every record without a location its ticker's coordinate.
pub fn fill_locations(records: &mut [FinancialRecord]) {
    for r in records.iter_mut().filter(|r| r.location.is_none()) {
        r.location = Some(location_for(&r.ticker).to_string());
    }
}

/// Split a "lat,lon" string. None if either half is not a float.
pub fn parse_location(loc: &str) -> Option<(f64, f64)> {
    let (lat, lon) = loc.split_once(',')?;
    Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
}

/// Tickers with a known headquarters, in table order.
pub fn known_tickers() -> impl Iterator<Item = (&'static str, &'static str)> {
    COMPANY_LOCATIONS.iter().copied()
}
