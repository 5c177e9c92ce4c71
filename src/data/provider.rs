use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;

use crate::data::series::RawSeries;
use crate::error::ProviderError;

/// Source of raw intraday series, one call per symbol.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Short provider name used in logs
    fn name(&self) -> &'static str;

    /// Retrieve the current intraday series for `symbol`. Single attempt.
    async fn fetch_series(&self, symbol: &str) -> Result<RawSeries, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: String,
    pub interval: String,
    pub request_timeout: Duration,
}

/// Alpha Vantage `TIME_SERIES_INTRADAY` client.
pub struct AlphaVantageClient {
    client: Client,
    settings: ProviderSettings,
}

impl AlphaVantageClient {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ProviderError::Transport {
                symbol: String::new(),
                source: e,
            })?;

        Ok(Self { client, settings })
    }

    fn request_error(&self, symbol: &str, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout {
                symbol: symbol.to_string(),
                timeout_ms: self.settings.request_timeout.as_millis(),
            }
        } else {
            ProviderError::Transport {
                symbol: symbol.to_string(),
                source: e,
            }
        }
    }
}

#[async_trait]
impl QuoteProvider for AlphaVantageClient {
    fn name(&self) -> &'static str {
        "alphavantage"
    }

    async fn fetch_series(&self, symbol: &str) -> Result<RawSeries, ProviderError> {
        debug!("Requesting {} intraday series for {}", self.settings.interval, symbol);

        let response = self
            .client
            .get(&self.settings.base_url)
            .query(&[
                ("function", "TIME_SERIES_INTRADAY"),
                ("symbol", symbol),
                ("interval", self.settings.interval.as_str()),
                ("apikey", self.settings.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| self.request_error(symbol, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                symbol: symbol.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.request_error(symbol, e))?;

        let series = RawSeries::from_provider_json(symbol, &body)?;
        debug!("Received {} bars for {}", series.len(), series.symbol());
        Ok(series)
    }
}
