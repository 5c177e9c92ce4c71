use std::collections::HashMap;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::data::FetchCoordinator;
use crate::websocket::outbound::Outbound;
use crate::websocket::protocol::{ControlMessage, UpdateMessage};
use crate::websocket::push::PushLoop;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Closed,
}

/// One recurring `getStock` stream owned by a session.
#[derive(Debug)]
pub struct Subscription {
    pub ticker: String,
    pub interval: Duration,
    token: CancellationToken,
}

impl Subscription {
    fn cancel(&self) {
        self.token.cancel();
    }
}

/// Per-connection subscription state.
///
/// Holds one [`Subscription`] per ticker, whose token is a child of the
/// session's shutdown token, so closing the session revokes every loop it
/// started. A repeated `getStock` for a ticker replaces the running loop.
pub struct SubscriptionSession {
    session_id: String,
    coordinator: FetchCoordinator,
    push_interval: Duration,
    outbound: Outbound,
    subscriptions: HashMap<String, Subscription>,
    state: SessionState,
}

impl SubscriptionSession {
    pub fn new(
        session_id: String,
        coordinator: FetchCoordinator,
        push_interval: Duration,
        outbound: Outbound,
    ) -> Self {
        Self {
            session_id,
            coordinator,
            push_interval,
            outbound,
            subscriptions: HashMap::new(),
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn active_tickers(&self) -> Vec<String> {
        let mut tickers: Vec<String> = self.subscriptions.keys().cloned().collect();
        tickers.sort();
        tickers
    }

    /// Handle one inbound text frame. Undecodable or unknown messages are
    /// logged and dropped.
    pub fn handle_text(&mut self, text: &str) {
        if self.state == SessionState::Closed {
            debug!("Session {} is closed, dropping message", self.session_id);
            return;
        }

        match ControlMessage::parse(text) {
            Ok(message) => self.handle_control(message),
            Err(e) => warn!("Ignoring message on session {}: {}", self.session_id, e),
        }
    }

    pub fn handle_control(&mut self, message: ControlMessage) {
        if self.state == SessionState::Closed {
            return;
        }

        match message {
            ControlMessage::GetStock { ticker } => self.start_push_loop(ticker),
            ControlMessage::StopStock { ticker } => self.stop_push_loop(&ticker),
            ControlMessage::GetStocks { stocks } => self.spawn_batch_response(stocks),
            ControlMessage::Unknown => {}
        }
    }

    fn start_push_loop(&mut self, ticker: String) {
        if let Some(previous) = self.subscriptions.remove(&ticker) {
            previous.cancel();
            info!("Session {} replacing subscription for {}", self.session_id, ticker);
        } else {
            info!("Session {} subscribed to {}", self.session_id, ticker);
        }

        // Revoked together with the session
        let token = self.outbound.shutdown().child_token();
        PushLoop::new(
            ticker.clone(),
            self.coordinator.clone(),
            self.push_interval,
            self.outbound.clone(),
            token.clone(),
        )
        .spawn();

        self.subscriptions.insert(
            ticker.clone(),
            Subscription {
                ticker,
                interval: self.push_interval,
                token,
            },
        );
        self.state = SessionState::Active;
    }

    fn stop_push_loop(&mut self, ticker: &str) {
        match self.subscriptions.remove(ticker) {
            Some(subscription) => {
                subscription.cancel();
                info!(
                    "Session {} unsubscribed from {} (every {:?})",
                    self.session_id, subscription.ticker, subscription.interval
                );
            }
            None => debug!("Session {} not subscribed to {}", self.session_id, ticker),
        }

        if self.subscriptions.is_empty() {
            self.state = SessionState::Idle;
        }
    }

    fn spawn_batch_response(&self, stocks: Vec<String>) {
        let token = self.outbound.shutdown().child_token();
        let coordinator = self.coordinator.clone();
        let outbound = self.outbound.clone();
        let session_id = self.session_id.clone();

        tokio::spawn(async move {
            let results = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                results = coordinator.fetch_batch(&stocks) => results,
            };

            for (symbol, result) in &results {
                if let Err(e) = result {
                    warn!("Session {} batch entry {} failed: {}", session_id, symbol, e);
                }
            }

            let payload = match UpdateMessage::stocks_data(results).to_json() {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to serialize batch for session {}: {}", session_id, e);
                    return;
                }
            };

            if token.is_cancelled() {
                return;
            }
            if let Err(e) = outbound.send_text(payload) {
                warn!("Session {} could not queue batch response: {}", session_id, e);
            }
        });
    }

    /// Cancel every push loop and mark the session closed. Idempotent.
    pub fn close(&mut self) {
        for (_, subscription) in self.subscriptions.drain() {
            subscription.cancel();
        }
        self.outbound.shutdown().cancel();
        self.state = SessionState::Closed;
    }
}

impl Drop for SubscriptionSession {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            self.close();
        }
    }
}
