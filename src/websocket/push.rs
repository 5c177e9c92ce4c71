use std::time::Duration;

use log::{debug, error, warn};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::data::FetchCoordinator;
use crate::websocket::outbound::Outbound;
use crate::websocket::protocol::UpdateMessage;

/// Recurring fetch-reduce-send task for one subscribed ticker.
pub struct PushLoop {
    ticker: String,
    coordinator: FetchCoordinator,
    interval: Duration,
    outbound: Outbound,
    token: CancellationToken,
}

impl PushLoop {
    pub fn new(
        ticker: String,
        coordinator: FetchCoordinator,
        interval: Duration,
        outbound: Outbound,
        token: CancellationToken,
    ) -> Self {
        Self {
            ticker,
            coordinator,
            interval,
            outbound,
            token,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        // First tick one full interval after subscribing.
        let mut timer = interval_at(Instant::now() + self.interval, self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = timer.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                result = self.coordinator.fetch_one(&self.ticker) => result,
            };

            let quote = match result {
                Ok(quote) => quote,
                Err(e) => {
                    warn!("Push tick for {} failed: {}", self.ticker, e);
                    continue;
                }
            };

            let payload = match UpdateMessage::stock_data(&quote.snapshot).to_json() {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to serialize update for {}: {}", self.ticker, e);
                    continue;
                }
            };

            if self.token.is_cancelled() {
                break;
            }
            if let Err(e) = self.outbound.send_text(payload) {
                warn!("Stopping push loop for {}: {}", self.ticker, e);
                break;
            }
        }

        debug!("Push loop for {} exited", self.ticker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::testing::{ibm_series, ScriptedProvider};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    fn push_loop(
        provider: Arc<ScriptedProvider>,
        ticker: &str,
        token: CancellationToken,
    ) -> (PushLoop, mpsc::Receiver<Message>, CancellationToken) {
        let (tx, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let coordinator = FetchCoordinator::new(provider, Duration::from_secs(1));
        let push = PushLoop::new(
            ticker.to_string(),
            coordinator,
            Duration::from_secs(2),
            Outbound::new(tx, shutdown.clone()),
            token,
        );
        (push, rx, shutdown)
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_one_update_per_tick() {
        let provider = Arc::new(ScriptedProvider::new().with_series(ibm_series()));
        let token = CancellationToken::new();
        let (push, mut rx, _shutdown) = push_loop(provider.clone(), "IBM", token.clone());
        let handle = push.spawn();

        tokio::time::sleep(Duration::from_millis(4500)).await;
        token.cancel();
        handle.await.unwrap();

        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(provider.calls(), 2);
        match &frames[0] {
            Message::Text(text) => assert!(text.contains("\"ticker\":\"IBM\"")),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_keeps_running() {
        let provider = Arc::new(ScriptedProvider::new().failing("IBM"));
        let token = CancellationToken::new();
        let (push, mut rx, shutdown) = push_loop(provider.clone(), "IBM", token.clone());
        let handle = push.spawn();

        tokio::time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(provider.calls(), 3);
        assert!(rx.try_recv().is_err());
        assert!(!shutdown.is_cancelled());

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_tick_never_fetches() {
        let provider = Arc::new(ScriptedProvider::new().with_series(ibm_series()));
        let token = CancellationToken::new();
        let (push, mut rx, _shutdown) = push_loop(provider.clone(), "IBM", token.clone());
        let handle = push.spawn();

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(provider.calls(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_queue_ends_loop_and_session() {
        let provider = Arc::new(ScriptedProvider::new().with_series(ibm_series()));
        let token = CancellationToken::new();
        let (push, rx, shutdown) = push_loop(provider, "IBM", token);
        drop(rx);

        push.spawn().await.unwrap();
        assert!(shutdown.is_cancelled());
    }
}
