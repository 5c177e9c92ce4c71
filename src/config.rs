use std::env;
use std::str::FromStr;
use std::time::Duration;
use log::warn;

// Server Configuration
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";
pub const DEFAULT_API_BIND_ADDRESS: &str = "127.0.0.1:8081";

// Provider Configuration
pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://www.alphavantage.co/query";
pub const DEFAULT_QUOTE_INTERVAL: &str = "5min";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SYMBOLS: &str = "IBM,PLTR";

// Cadences
pub const DEFAULT_PUSH_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;

// Per-session outbound queue
pub const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 100;

pub struct Config {
    pub bind_address: String,
    pub api_bind_address: String,
    pub api_key: String,
    pub provider_base_url: String,
    pub quote_interval: String,
    pub symbols: Vec<String>,
    pub push_interval: Duration,
    pub refresh_interval: Duration,
    pub request_timeout: Duration,
    pub max_concurrent_fetches: Option<usize>,
    pub outbound_queue_size: usize,
    pub refresh_on_startup: bool,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string()),
            api_bind_address: env::var("API_BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_API_BIND_ADDRESS.to_string()),
            api_key: env::var("API_KEY").unwrap_or_default(),
            provider_base_url: env::var("PROVIDER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_PROVIDER_BASE_URL.to_string()),
            quote_interval: env::var("QUOTE_INTERVAL")
                .unwrap_or_else(|_| DEFAULT_QUOTE_INTERVAL.to_string()),
            symbols: parse_symbols(
                &env::var("SYMBOLS").unwrap_or_else(|_| DEFAULT_SYMBOLS.to_string()),
            ),
            push_interval: Duration::from_secs(env_or("PUSH_INTERVAL_SECS", DEFAULT_PUSH_INTERVAL_SECS)),
            refresh_interval: Duration::from_secs(env_or(
                "REFRESH_INTERVAL_SECS",
                DEFAULT_REFRESH_INTERVAL_SECS,
            )),
            request_timeout: Duration::from_secs(env_or(
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            max_concurrent_fetches: env::var("MAX_CONCURRENT_FETCHES")
                .ok()
                .and_then(|raw| parse_or_warn("MAX_CONCURRENT_FETCHES", &raw)),
            outbound_queue_size: env_or("OUTBOUND_QUEUE_SIZE", DEFAULT_OUTBOUND_QUEUE_SIZE),
            refresh_on_startup: env_or("REFRESH_ON_STARTUP", false),
            log_level: env::var("RUST_LOG")
                .unwrap_or_else(|_| "info".to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.api_key.trim().is_empty() {
            return Err("API_KEY is not set".to_string());
        }

        if self.symbols.is_empty() {
            return Err("SYMBOLS must name at least one ticker".to_string());
        }

        if self.push_interval.is_zero() || self.refresh_interval.is_zero() {
            return Err("Push and refresh intervals must be greater than zero".to_string());
        }

        if self.request_timeout.is_zero() {
            return Err("REQUEST_TIMEOUT_SECS must be greater than zero".to_string());
        }

        if self.outbound_queue_size == 0 {
            return Err("OUTBOUND_QUEUE_SIZE must be greater than zero".to_string());
        }

        if self.max_concurrent_fetches == Some(0) {
            return Err("MAX_CONCURRENT_FETCHES must be greater than zero when set".to_string());
        }

        Ok(())
    }

    pub fn log_config(&self) {
        println!("Server Configuration:");
        println!("  WebSocket Address: {}", self.bind_address);
        println!("  API Address: {}", self.api_bind_address);
        println!("  Provider: {} ({})", self.provider_base_url, self.quote_interval);
        println!("  Symbols: {}", self.symbols.join(","));
        println!("  Push Interval: {:?}", self.push_interval);
        println!("  Refresh Interval: {:?}", self.refresh_interval);
        println!("  Request Timeout: {:?}", self.request_timeout);
        println!("  Log Level: {}", self.log_level);
        println!("  API Key: {}***", self.api_key.chars().take(4).collect::<String>());
    }
}

fn parse_symbols(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    symbols.sort();
    symbols.dedup();
    symbols
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| parse_or_warn(key, &raw))
        .unwrap_or(default)
}

fn parse_or_warn<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {}: '{}'", key, raw);
            None
        }
    }
}
