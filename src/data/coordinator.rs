use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::Semaphore;
use tokio_util::task::AbortOnDropHandle;

use crate::data::aggregator::{reduce, Snapshot};
use crate::data::provider::QuoteProvider;
use crate::data::series::RawSeries;
use crate::error::{FetchError, ProviderError};

/// Raw series together with its reduction.
#[derive(Debug, Clone)]
pub struct SymbolQuote {
    pub series: RawSeries,
    pub snapshot: Snapshot,
}

pub type FetchResult = Result<SymbolQuote, FetchError>;

/// Trim and upper-case a ticker symbol.
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Fans symbol retrievals out to the provider and joins them back.
///
/// Cheap to clone; clones share the provider and the optional limiter.
#[derive(Clone)]
pub struct FetchCoordinator {
    provider: Arc<dyn QuoteProvider>,
    request_timeout: Duration,
    limiter: Option<Arc<Semaphore>>,
}

impl FetchCoordinator {
    pub fn new(provider: Arc<dyn QuoteProvider>, request_timeout: Duration) -> Self {
        Self {
            provider,
            request_timeout,
            limiter: None,
        }
    }

    /// Cap the number of retrievals in flight across all callers.
    pub fn with_concurrency_limit(mut self, permits: usize) -> Self {
        self.limiter = Some(Arc::new(Semaphore::new(permits.max(1))));
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Retrieve and reduce one symbol.
    pub async fn fetch_one(&self, symbol: &str) -> FetchResult {
        let series = self.retrieve(symbol).await?;
        let snapshot = reduce(&series).map_err(|source| FetchError::Aggregation {
            symbol: symbol.to_string(),
            source,
        })?;
        Ok(SymbolQuote { series, snapshot })
    }

    /// Retrieve every symbol concurrently and wait for all of them.
    ///
    /// Symbols are normalized and de-duplicated first. A failure for one
    /// symbol only affects that symbol's entry. Dropping the returned future
    /// aborts the retrievals still in flight.
    pub async fn fetch_batch<I, S>(&self, symbols: I) -> BTreeMap<String, FetchResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols: BTreeSet<String> = symbols
            .into_iter()
            .map(|s| normalize_symbol(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();

        let handles: Vec<(String, AbortOnDropHandle<FetchResult>)> = symbols
            .into_iter()
            .map(|symbol| {
                let coordinator = self.clone();
                let task_symbol = symbol.clone();
                let handle = tokio::spawn(async move { coordinator.fetch_one(&task_symbol).await });
                (symbol, AbortOnDropHandle::new(handle))
            })
            .collect();

        let mut results = BTreeMap::new();
        for (symbol, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(FetchError::Task {
                    symbol: symbol.clone(),
                    reason: e.to_string(),
                }),
            };
            results.insert(symbol, result);
        }

        debug!(
            "Batch of {} symbols complete, {} failed",
            results.len(),
            results.values().filter(|r| r.is_err()).count()
        );
        results
    }

    async fn retrieve(&self, symbol: &str) -> Result<RawSeries, ProviderError> {
        let _permit = match &self.limiter {
            Some(limiter) => limiter.acquire().await.ok(),
            None => None,
        };

        let result =
            match tokio::time::timeout(self.request_timeout, self.provider.fetch_series(symbol)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    symbol: symbol.to_string(),
                    timeout_ms: self.request_timeout.as_millis(),
                }),
            };

        if let Err(e) = &result {
            debug!("{} retrieval from {} failed: {}", e.symbol(), self.provider.name(), e);
        }
        result
    }
}
