use thiserror::Error;

/// Failure talking to the market-data provider. Always carries the symbol.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request for {symbol} failed: {source}")]
    Transport {
        symbol: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("provider returned HTTP {status} for {symbol}")]
    Status { symbol: String, status: u16 },

    #[error("could not decode provider response for {symbol}: {reason}")]
    Decode { symbol: String, reason: String },

    #[error("provider rejected request for {symbol}: {message}")]
    Api { symbol: String, message: String },

    #[error("request for {symbol} timed out after {timeout_ms}ms")]
    Timeout { symbol: String, timeout_ms: u128 },
}

impl ProviderError {
    pub fn symbol(&self) -> &str {
        match self {
            ProviderError::Transport { symbol, .. }
            | ProviderError::Status { symbol, .. }
            | ProviderError::Decode { symbol, .. }
            | ProviderError::Api { symbol, .. }
            | ProviderError::Timeout { symbol, .. } => symbol,
        }
    }
}

/// Data-quality failure while reducing a series.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("series for {symbol} has no entries")]
    EmptySeries { symbol: String },

    #[error("malformed entry at '{timestamp}': {reason}")]
    MalformedEntry { timestamp: String, reason: String },
}

/// Outcome of a failed retrieval for one symbol.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("aggregation failed for {symbol}: {source}")]
    Aggregation {
        symbol: String,
        #[source]
        source: AggregationError,
    },

    #[error("retrieval task for {symbol} did not complete: {reason}")]
    Task { symbol: String, reason: String },
}

/// Undecodable or unrecognized control message.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid control message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unknown action in control message: {0}")]
    UnknownAction(String),

    #[error("control message '{action}' has an empty ticker")]
    EmptyTicker { action: &'static str },
}

/// Write failure on a client channel. Fatal to the session.
#[derive(Error, Debug)]
#[error("transport write failed: {0}")]
pub struct TransportError(pub String);
