use std::collections::{BTreeMap, HashMap};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ProviderError;

const META_DATA_KEY: &str = "Meta Data";
const TIME_SERIES_PREFIX: &str = "Time Series (";
const PROVIDER_MESSAGE_KEYS: [&str; 3] = ["Error Message", "Note", "Information"];

/// One sampled bar, values kept exactly as the provider formats them.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RawQuoteEntry {
    #[serde(rename = "1. open")]
    pub open: String,
    #[serde(rename = "2. high")]
    pub high: String,
    #[serde(rename = "3. low")]
    pub low: String,
    #[serde(rename = "4. close")]
    pub close: String,
    #[serde(rename = "5. volume")]
    pub volume: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct MetaData {
    #[serde(rename = "1. Information", default)]
    pub information: String,
    #[serde(rename = "2. Symbol", default)]
    pub symbol: String,
    #[serde(rename = "3. Last Refreshed", default)]
    pub last_refreshed: String,
    #[serde(rename = "4. Interval", default)]
    pub interval: String,
    #[serde(rename = "5. Output Size", default)]
    pub output_size: String,
    #[serde(rename = "6. Time Zone", default)]
    pub time_zone: String,
}

/// Unreduced intraday series for one symbol, keyed by timestamp string.
///
/// Serializes back into the provider's own shape so clients receive the
/// same document the provider produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSeries {
    pub meta: MetaData,
    pub entries: HashMap<String, RawQuoteEntry>,
}

impl RawSeries {
    pub fn new(meta: MetaData, entries: HashMap<String, RawQuoteEntry>) -> Self {
        Self { meta, entries }
    }

    pub fn symbol(&self) -> &str {
        &self.meta.symbol
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn series_key(&self) -> String {
        format!("{}{})", TIME_SERIES_PREFIX, self.meta.interval)
    }

    /// Decode a provider response body for `symbol`.
    ///
    /// A body that carries one of the provider's message fields instead of a
    /// time series (invalid symbol, exhausted quota) is reported as
    /// [`ProviderError::Api`].
    pub fn from_provider_json(symbol: &str, body: &str) -> Result<Self, ProviderError> {
        let mut document: Map<String, Value> =
            serde_json::from_str(body).map_err(|e| ProviderError::Decode {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;

        let series_key = document
            .keys()
            .find(|key| key.starts_with(TIME_SERIES_PREFIX))
            .cloned();

        let Some(series_key) = series_key else {
            let message = PROVIDER_MESSAGE_KEYS
                .iter()
                .find_map(|key| document.get(*key).and_then(Value::as_str));
            return Err(match message {
                Some(message) => ProviderError::Api {
                    symbol: symbol.to_string(),
                    message: message.to_string(),
                },
                None => ProviderError::Decode {
                    symbol: symbol.to_string(),
                    reason: "response has no time series".to_string(),
                },
            });
        };

        let mut meta: MetaData = match document.remove(META_DATA_KEY) {
            Some(value) => serde_json::from_value(value).map_err(|e| ProviderError::Decode {
                symbol: symbol.to_string(),
                reason: format!("invalid meta data: {}", e),
            })?,
            None => MetaData::default(),
        };
        if meta.symbol.is_empty() {
            meta.symbol = symbol.to_string();
        }
        if meta.interval.is_empty() {
            meta.interval = series_key
                .trim_start_matches(TIME_SERIES_PREFIX)
                .trim_end_matches(')')
                .to_string();
        }

        let entries = document
            .remove(&series_key)
            .map(serde_json::from_value::<HashMap<String, RawQuoteEntry>>)
            .transpose()
            .map_err(|e| ProviderError::Decode {
                symbol: symbol.to_string(),
                reason: format!("invalid time series: {}", e),
            })?
            .unwrap_or_default();

        Ok(Self::new(meta, entries))
    }
}

impl Serialize for RawSeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let ordered: BTreeMap<&String, &RawQuoteEntry> = self.entries.iter().collect();
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(META_DATA_KEY, &self.meta)?;
        map.serialize_entry(&self.series_key(), &ordered)?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IBM_BODY: &str = r#"{
        "Meta Data": {
            "1. Information": "Intraday (5min) open, high, low, close prices and volume",
            "2. Symbol": "IBM",
            "3. Last Refreshed": "2024-01-01 09:35:00",
            "4. Interval": "5min",
            "5. Output Size": "Compact",
            "6. Time Zone": "US/Eastern"
        },
        "Time Series (5min)": {
            "2024-01-01 09:35:00": {
                "1. open": "103.0000", "2. high": "110.0000", "3. low": "101.0000",
                "4. close": "108.0000", "5. volume": "1200"
            },
            "2024-01-01 09:30:00": {
                "1. open": "100.0000", "2. high": "105.0000", "3. low": "99.0000",
                "4. close": "103.0000", "5. volume": "900"
            }
        }
    }"#;

    #[test]
    fn test_decode_provider_body() {
        let series = RawSeries::from_provider_json("IBM", IBM_BODY).unwrap();

        assert_eq!(series.symbol(), "IBM");
        assert_eq!(series.meta.interval, "5min");
        assert_eq!(series.meta.last_refreshed, "2024-01-01 09:35:00");
        assert_eq!(series.len(), 2);
        assert_eq!(series.entries["2024-01-01 09:35:00"].close, "108.0000");
    }

    #[test]
    fn test_provider_message_is_api_error() {
        let body = r#"{"Error Message": "Invalid API call."}"#;
        let err = RawSeries::from_provider_json("NOPE", body).unwrap_err();

        match err {
            ProviderError::Api { symbol, message } => {
                assert_eq!(symbol, "NOPE");
                assert_eq!(message, "Invalid API call.");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_rate_limit_note_is_api_error() {
        let body = r#"{"Note": "Thank you for using our API. Our standard call frequency is 5 calls per minute."}"#;
        assert!(matches!(
            RawSeries::from_provider_json("IBM", body),
            Err(ProviderError::Api { .. })
        ));
    }

    #[test]
    fn test_undecodable_body() {
        let err = RawSeries::from_provider_json("IBM", "<html>oops</html>").unwrap_err();
        assert!(matches!(err, ProviderError::Decode { .. }));
        assert_eq!(err.symbol(), "IBM");
    }

    #[test]
    fn test_missing_meta_falls_back_to_request() {
        let body = r#"{"Time Series (1min)": {}}"#;
        let series = RawSeries::from_provider_json("PLTR", body).unwrap();

        assert_eq!(series.symbol(), "PLTR");
        assert_eq!(series.meta.interval, "1min");
        assert!(series.is_empty());
    }

    #[test]
    fn test_serializes_in_provider_shape() {
        let series = RawSeries::from_provider_json("IBM", IBM_BODY).unwrap();
        let value = serde_json::to_value(&series).unwrap();

        assert_eq!(value["Meta Data"]["2. Symbol"], "IBM");
        assert_eq!(
            value["Time Series (5min)"]["2024-01-01 09:30:00"]["3. low"],
            "99.0000"
        );
    }
}
