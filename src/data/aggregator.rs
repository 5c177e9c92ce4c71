use chrono::NaiveDateTime;
use serde::Serialize;

use crate::data::series::{RawQuoteEntry, RawSeries};
use crate::error::AggregationError;

/// Timestamp layout used by the provider for intraday bars.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Latest/high/low summary of one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub symbol: String,
    pub latest_price: f64,
    pub latest_timestamp: NaiveDateTime,
    pub highest_price: f64,
    pub lowest_price: f64,
}

struct ParsedBar {
    at: NaiveDateTime,
    high: f64,
    low: f64,
    close: f64,
}

#[derive(Clone, Copy)]
struct Extremes {
    high: f64,
    low: f64,
}

impl Extremes {
    fn observe(current: Option<Self>, bar: &ParsedBar) -> Self {
        match current {
            None => Self { high: bar.high, low: bar.low },
            Some(seen) => Self {
                high: seen.high.max(bar.high),
                low: seen.low.min(bar.low),
            },
        }
    }
}

/// Reduce a raw series into a [`Snapshot`].
///
/// Every entry must parse; the first malformed one (in key order) fails the
/// whole call. Keys are walked in sorted order, which for the fixed
/// timestamp layout is also chronological order, so neither the result nor
/// the reported error depends on map iteration order.
pub fn reduce(series: &RawSeries) -> Result<Snapshot, AggregationError> {
    if series.is_empty() {
        return Err(AggregationError::EmptySeries {
            symbol: series.symbol().to_string(),
        });
    }

    let mut keyed: Vec<(&String, &RawQuoteEntry)> = series.entries.iter().collect();
    keyed.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let bars = keyed
        .into_iter()
        .map(|(timestamp, entry)| parse_bar(timestamp, entry))
        .collect::<Result<Vec<_>, _>>()?;

    let extremes = bars
        .iter()
        .fold(None, |seen, bar| Some(Extremes::observe(seen, bar)));

    match (bars.last(), extremes) {
        (Some(latest), Some(extremes)) => Ok(Snapshot {
            symbol: series.symbol().to_string(),
            latest_price: latest.close,
            latest_timestamp: latest.at,
            highest_price: extremes.high,
            lowest_price: extremes.low,
        }),
        _ => Err(AggregationError::EmptySeries {
            symbol: series.symbol().to_string(),
        }),
    }
}

fn parse_bar(timestamp: &str, entry: &RawQuoteEntry) -> Result<ParsedBar, AggregationError> {
    let at = parse_timestamp(timestamp)?;

    parse_price(timestamp, "open", &entry.open)?;
    let high = parse_price(timestamp, "high", &entry.high)?;
    let low = parse_price(timestamp, "low", &entry.low)?;
    let close = parse_price(timestamp, "close", &entry.close)?;

    if low > high {
        return Err(malformed(timestamp, format!("low {} above high {}", low, high)));
    }
    if close < low || close > high {
        return Err(malformed(
            timestamp,
            format!("close {} outside range [{}, {}]", close, low, high),
        ));
    }

    Ok(ParsedBar {
        at,
        high,
        low,
        close,
    })
}

/// Parse a bar key, accepting only the zero-padded `YYYY-MM-DD HH:MM:SS` form.
fn parse_timestamp(timestamp: &str) -> Result<NaiveDateTime, AggregationError> {
    let at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .map_err(|e| malformed(timestamp, format!("invalid timestamp: {}", e)))?;

    // chrono tolerates unpadded fields; round-trip to reject them
    if at.format(TIMESTAMP_FORMAT).to_string() != timestamp {
        return Err(malformed(
            timestamp,
            format!("timestamp is not in {} form", TIMESTAMP_FORMAT),
        ));
    }
    Ok(at)
}

fn parse_price(timestamp: &str, field: &str, raw: &str) -> Result<f64, AggregationError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|e| malformed(timestamp, format!("invalid {} '{}': {}", field, raw, e)))?;
    if !value.is_finite() {
        return Err(malformed(timestamp, format!("non-finite {} '{}'", field, raw)));
    }
    Ok(value)
}

fn malformed(timestamp: &str, reason: String) -> AggregationError {
    AggregationError::MalformedEntry {
        timestamp: timestamp.to_string(),
        reason,
    }
}
