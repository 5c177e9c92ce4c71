use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::{normalize_symbol, FetchResult, RawSeries, Snapshot};
use crate::error::ProtocolError;

/// Client -> server control message.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "action")]
pub enum ControlMessage {
    /// Start (or replace) a recurring single-symbol subscription
    #[serde(rename = "getStock")]
    GetStock { ticker: String },
    /// One-shot multi-symbol fetch
    #[serde(rename = "getStocks")]
    GetStocks { stocks: Vec<String> },
    #[serde(rename = "stopStock")]
    StopStock { ticker: String },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct Envelope {
    action: String,
}

impl ControlMessage {
    /// Decode and normalize a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let message: ControlMessage = serde_json::from_str(text)?;

        match message {
            ControlMessage::GetStock { ticker } => Ok(ControlMessage::GetStock {
                ticker: required_ticker("getStock", &ticker)?,
            }),
            ControlMessage::StopStock { ticker } => Ok(ControlMessage::StopStock {
                ticker: required_ticker("stopStock", &ticker)?,
            }),
            ControlMessage::GetStocks { stocks } => Ok(ControlMessage::GetStocks {
                stocks: stocks
                    .iter()
                    .map(|s| normalize_symbol(s))
                    .filter(|s| !s.is_empty())
                    .collect(),
            }),
            ControlMessage::Unknown => {
                let action = serde_json::from_str::<Envelope>(text)
                    .map(|envelope| envelope.action)
                    .unwrap_or_default();
                Err(ProtocolError::UnknownAction(action))
            }
        }
    }
}

fn required_ticker(action: &'static str, raw: &str) -> Result<String, ProtocolError> {
    let ticker = normalize_symbol(raw);
    if ticker.is_empty() {
        return Err(ProtocolError::EmptyTicker { action });
    }
    Ok(ticker)
}

/// Server -> client update.
#[derive(Debug, Serialize)]
#[serde(tag = "action")]
pub enum UpdateMessage {
    #[serde(rename = "stockData", rename_all = "camelCase")]
    StockData {
        ticker: String,
        latest_price: f64,
        highest_price: f64,
        lowest_price: f64,
    },
    #[serde(rename = "stocksData")]
    StocksData { data: Vec<StockEntry> },
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum StockEntry {
    Quote(QuoteEntry),
    Failed(FailedEntry),
}

/// Raw provider document for one symbol plus its reduction.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteEntry {
    pub ticker: String,
    #[serde(flatten)]
    pub series: RawSeries,
    pub latest_price: f64,
    pub highest_price: f64,
    pub lowest_price: f64,
}

#[derive(Debug, Serialize)]
pub struct FailedEntry {
    pub ticker: String,
    pub error: String,
}

impl UpdateMessage {
    pub fn stock_data(snapshot: &Snapshot) -> Self {
        UpdateMessage::StockData {
            ticker: snapshot.symbol.clone(),
            latest_price: snapshot.latest_price,
            highest_price: snapshot.highest_price,
            lowest_price: snapshot.lowest_price,
        }
    }

    pub fn stocks_data(results: BTreeMap<String, FetchResult>) -> Self {
        let data = results
            .into_iter()
            .map(|(ticker, result)| match result {
                Ok(quote) => StockEntry::Quote(QuoteEntry {
                    ticker,
                    latest_price: quote.snapshot.latest_price,
                    highest_price: quote.snapshot.highest_price,
                    lowest_price: quote.snapshot.lowest_price,
                    series: quote.series,
                }),
                Err(e) => StockEntry::Failed(FailedEntry {
                    ticker,
                    error: e.to_string(),
                }),
            })
            .collect();

        UpdateMessage::StocksData { data }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
