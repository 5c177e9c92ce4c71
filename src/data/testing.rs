use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::data::provider::QuoteProvider;
use crate::data::series::{MetaData, RawQuoteEntry, RawSeries};
use crate::error::ProviderError;

pub fn bar(timestamp: &str, open: f64, high: f64, low: f64, close: f64) -> (String, RawQuoteEntry) {
    (
        timestamp.to_string(),
        RawQuoteEntry {
            open: format!("{:.4}", open),
            high: format!("{:.4}", high),
            low: format!("{:.4}", low),
            close: format!("{:.4}", close),
            volume: "1000".to_string(),
        },
    )
}

pub fn series(symbol: &str, bars: &[(&str, f64, f64, f64, f64)]) -> RawSeries {
    let meta = MetaData {
        symbol: symbol.to_string(),
        interval: "5min".to_string(),
        ..Default::default()
    };
    let entries = bars
        .iter()
        .map(|(ts, o, h, l, c)| bar(ts, *o, *h, *l, *c))
        .collect();
    RawSeries::new(meta, entries)
}

pub fn ibm_series() -> RawSeries {
    series(
        "IBM",
        &[
            ("2024-01-01 09:30:00", 100.0, 105.0, 99.0, 103.0),
            ("2024-01-01 09:35:00", 103.0, 110.0, 101.0, 108.0),
        ],
    )
}

/// In-memory provider answering from a fixed script.
#[derive(Default)]
pub struct ScriptedProvider {
    series: HashMap<String, RawSeries>,
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, series: RawSeries) -> Self {
        self.series.insert(series.symbol().to_string(), series);
        self
    }

    pub fn failing(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_string());
        self
    }

    pub fn delayed(mut self, symbol: &str, delay: Duration) -> Self {
        self.delays.insert(symbol.to_string(), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_series(&self, symbol: &str) -> Result<RawSeries, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(symbol) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(symbol) {
            return Err(ProviderError::Status {
                symbol: symbol.to_string(),
                status: 503,
            });
        }
        self.series
            .get(symbol)
            .cloned()
            .ok_or_else(|| ProviderError::Api {
                symbol: symbol.to_string(),
                message: "Invalid API call.".to_string(),
            })
    }
}
