use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::data::aggregator::Snapshot;
use crate::data::coordinator::{FetchCoordinator, FetchResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum RefreshState {
    Stopped,
    Running,
}

#[derive(Debug, Clone)]
pub enum RefreshCommand {
    Start,
    Stop,
    Restart,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchEntry {
    Quote(Snapshot),
    Failed { symbol: String, error: String },
}

/// One complete refresh cycle. Published whole, never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteBatch {
    pub cycle: u64,
    pub refreshed_at: DateTime<Utc>,
    pub entries: Vec<BatchEntry>,
}

impl QuoteBatch {
    pub fn from_results(cycle: u64, results: BTreeMap<String, FetchResult>) -> Self {
        let entries = results
            .into_iter()
            .map(|(symbol, result)| match result {
                Ok(quote) => BatchEntry::Quote(quote.snapshot),
                Err(e) => BatchEntry::Failed {
                    symbol,
                    error: e.to_string(),
                },
            })
            .collect();

        Self {
            cycle,
            refreshed_at: Utc::now(),
            entries,
        }
    }

    pub fn failures(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, BatchEntry::Failed { .. }))
            .count()
    }
}

type Published = Option<Arc<QuoteBatch>>;

/// Refreshes a fixed symbol universe on a cadence and publishes each
/// completed batch by swapping the value held in a watch channel.
pub struct BackgroundRefresher {
    coordinator: FetchCoordinator,
    universe: Vec<String>,
    interval: Duration,
    state: Mutex<RefreshState>,
    cancel: Mutex<Option<CancellationToken>>,
    published: Arc<watch::Sender<Published>>,
}

impl BackgroundRefresher {
    pub fn new(coordinator: FetchCoordinator, universe: Vec<String>, interval: Duration) -> Self {
        let (published, _) = watch::channel(None);
        Self {
            coordinator,
            universe,
            interval,
            state: Mutex::new(RefreshState::Stopped),
            cancel: Mutex::new(None),
            published: Arc::new(published),
        }
    }

    pub fn state(&self) -> RefreshState {
        *self.state.lock()
    }

    pub fn universe(&self) -> &[String] {
        &self.universe
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Most recently published batch, if any cycle has completed.
    pub fn latest(&self) -> Option<Arc<QuoteBatch>> {
        self.published.borrow().clone()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<Published> {
        self.published.subscribe()
    }

    pub fn execute_command(&self, command: RefreshCommand) -> Result<String, String> {
        let state = self.state();

        match (state, command) {
            (RefreshState::Stopped, RefreshCommand::Start) => self.start_refreshing(),
            (RefreshState::Running, RefreshCommand::Start) => {
                Err("Refresher is already running".to_string())
            }
            (_, RefreshCommand::Stop) => self.stop_refreshing(),
            (_, RefreshCommand::Restart) => {
                self.stop_refreshing()?;
                self.start_refreshing()
            }
        }
    }

    fn start_refreshing(&self) -> Result<String, String> {
        if self.universe.is_empty() {
            return Err("No symbols configured for background refresh".to_string());
        }

        // Replace any token left over from a previous run
        let token = CancellationToken::new();
        {
            let mut cancel = self.cancel.lock();
            if let Some(previous) = cancel.replace(token.clone()) {
                previous.cancel();
            }
        }

        let coordinator = self.coordinator.clone();
        let universe = self.universe.clone();
        let interval = self.interval;
        let published = self.published.clone();

        // Refresh task - first cycle fires immediately
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut cycle = 0u64;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {}
                }

                let results = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    results = coordinator.fetch_batch(&universe) => results,
                };

                // Publish the whole batch at once
                cycle += 1;
                let batch = QuoteBatch::from_results(cycle, results);
                let failures = batch.failures();
                if failures > 0 {
                    warn!(
                        "Refresh cycle {}: {} of {} symbols failed",
                        cycle,
                        failures,
                        batch.entries.len()
                    );
                } else {
                    info!("Refresh cycle {}: {} symbols updated", cycle, batch.entries.len());
                }
                published.send_replace(Some(Arc::new(batch)));
            }

            info!("Background refresh stopped after {} cycles", cycle);
        });

        *self.state.lock() = RefreshState::Running;

        info!(
            "🚀 Started background refresh for {} symbols every {:?}",
            self.universe.len(),
            self.interval
        );
        Ok(format!(
            "Background refresh started for {} symbols",
            self.universe.len()
        ))
    }

    fn stop_refreshing(&self) -> Result<String, String> {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
        *self.state.lock() = RefreshState::Stopped;

        info!("🛑 Background refresh stopped");
        Ok("Background refresh stopped".to_string())
    }
}

impl Drop for BackgroundRefresher {
    fn drop(&mut self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::testing::{ibm_series, ScriptedProvider};

    fn refresher(interval: Duration) -> BackgroundRefresher {
        let provider = ScriptedProvider::new().with_series(ibm_series()).failing("PLTR");
        let coordinator = FetchCoordinator::new(Arc::new(provider), Duration::from_secs(5));
        BackgroundRefresher::new(
            coordinator,
            vec!["IBM".to_string(), "PLTR".to_string()],
            interval,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_complete_batches() {
        let refresher = refresher(Duration::from_secs(300));
        let mut rx = refresher.subscribe();
        assert!(refresher.latest().is_none());

        refresher.execute_command(RefreshCommand::Start).unwrap();
        rx.changed().await.unwrap();

        let batch = refresher.latest().unwrap();
        assert_eq!(batch.cycle, 1);
        assert_eq!(batch.entries.len(), 2);
        assert_eq!(batch.failures(), 1);
        match &batch.entries[0] {
            BatchEntry::Quote(snapshot) => assert_eq!(snapshot.symbol, "IBM"),
            other => panic!("expected IBM snapshot, got {:?}", other),
        }
        match &batch.entries[1] {
            BatchEntry::Failed { symbol, .. } => assert_eq!(symbol, "PLTR"),
            other => panic!("expected PLTR failure, got {:?}", other),
        }

        rx.changed().await.unwrap();
        assert_eq!(refresher.latest().unwrap().cycle, 2);

        refresher.execute_command(RefreshCommand::Stop).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_publishing() {
        let refresher = refresher(Duration::from_secs(60));
        let mut rx = refresher.subscribe();

        refresher.execute_command(RefreshCommand::Start).unwrap();
        rx.changed().await.unwrap();
        refresher.execute_command(RefreshCommand::Stop).unwrap();
        assert_eq!(refresher.state(), RefreshState::Stopped);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(refresher.latest().unwrap().cycle, 1);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let refresher = refresher(Duration::from_secs(60));

        assert!(refresher.execute_command(RefreshCommand::Start).is_ok());
        assert!(refresher.execute_command(RefreshCommand::Start).is_err());
        assert!(refresher.execute_command(RefreshCommand::Restart).is_ok());
        assert_eq!(refresher.state(), RefreshState::Running);
    }

    #[tokio::test]
    async fn test_empty_universe_cannot_start() {
        let coordinator =
            FetchCoordinator::new(Arc::new(ScriptedProvider::new()), Duration::from_secs(5));
        let refresher = BackgroundRefresher::new(coordinator, Vec::new(), Duration::from_secs(60));

        assert!(refresher.execute_command(RefreshCommand::Start).is_err());
        assert_eq!(refresher.state(), RefreshState::Stopped);
    }
}
