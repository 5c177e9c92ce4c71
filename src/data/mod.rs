pub mod aggregator;
pub mod coordinator;
pub mod provider;
pub mod refresher;
pub mod series;

#[cfg(test)]
pub mod testing;

pub use aggregator::Snapshot;
pub use coordinator::{normalize_symbol, FetchCoordinator, FetchResult};
pub use provider::{AlphaVantageClient, ProviderSettings};
pub use refresher::{BackgroundRefresher, RefreshCommand, RefreshState};
pub use series::RawSeries;
