use std::fmt::Display;
use std::time::Duration;

use futures::{Sink, Stream, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::data::FetchCoordinator;
use crate::websocket::outbound::{spawn_write_task, Outbound};
use crate::websocket::session::SubscriptionSession;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub push_interval: Duration,
    pub outbound_capacity: usize,
}

pub struct WebSocketHandler {
    coordinator: FetchCoordinator,
    settings: SessionSettings,
    peer_addr: String,
}

impl WebSocketHandler {
    pub fn new(coordinator: FetchCoordinator, settings: SessionSettings, peer_addr: String) -> Self {
        Self {
            coordinator,
            settings,
            peer_addr,
        }
    }

    pub async fn handle_connection(self, ws_stream: WebSocketStream<TcpStream>) {
        let (write, read) = ws_stream.split();
        self.serve(write, read).await;
    }

    /// Run one session over an already-upgraded transport until the peer
    /// goes away or a write fails.
    pub async fn serve<W, R, E>(self, write: W, mut read: R)
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let session_id = Uuid::new_v4().to_string();
        let short_id = session_id[..8].to_string();
        let shutdown = CancellationToken::new();

        // Write task - sole owner of the sink
        let (tx, rx) = mpsc::channel::<Message>(self.settings.outbound_capacity.max(1));
        let write_task = spawn_write_task(write, rx, shutdown.clone(), short_id.clone());

        // Subscription state for this connection
        let mut session = SubscriptionSession::new(
            short_id.clone(),
            self.coordinator.clone(),
            self.settings.push_interval,
            Outbound::new(tx, shutdown.clone()),
        );

        info!("WebSocket session {} established from {}", short_id, self.peer_addr);

        // Read loop - handles incoming control messages
        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    warn!("Transport failed for session {}, closing", short_id);
                    break;
                }
                frame = read.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => session.handle_text(&text),
                Some(Ok(Message::Close(close_frame))) => {
                    info!("Client sent close frame for session {}: {:?}", short_id, close_frame);
                    break;
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    debug!("Received ping/pong on session {}", short_id);
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!("Ignoring binary frame ({} bytes) on session {}", data.len(), short_id);
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    error!("WebSocket error for session {}: {}", short_id, e);
                    break;
                }
                None => {
                    info!("Peer {} disconnected from session {}", self.peer_addr, short_id);
                    break;
                }
            }
        }

        // Cleanup
        debug!(
            "Session {} closing in state {:?} with subscriptions {:?}",
            short_id,
            session.state(),
            session.active_tickers()
        );
        session.close();
        drop(session);

        // Let the writer flush and close the sink
        if let Err(e) = write_task.await {
            error!("Write task for session {} failed: {}", short_id, e);
        }

        info!("WebSocket session {} closed from {}", short_id, self.peer_addr);
    }
}
