use std::fmt::Display;

use futures::{Sink, SinkExt};
use log::{debug, error};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Handle for queueing frames to a session's single writer task.
///
/// The queue is bounded. A full queue means the client is not draining
/// frames, which is treated the same as a failed write: the session's
/// shutdown token is cancelled.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Message>,
    shutdown: CancellationToken,
}

impl Outbound {
    pub fn new(tx: mpsc::Sender<Message>, shutdown: CancellationToken) -> Self {
        Self { tx, shutdown }
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn send_text(&self, payload: String) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError("session is closed".to_string()));
        }

        self.tx.try_send(Message::Text(payload)).map_err(|e| {
            self.shutdown.cancel();
            match e {
                TrySendError::Full(_) => TransportError("outbound queue full".to_string()),
                TrySendError::Closed(_) => TransportError("outbound queue closed".to_string()),
            }
        })
    }
}

/// Drain the outbound queue into the client sink. The only task that
/// writes to the transport.
pub fn spawn_write_task<W>(
    mut write: W,
    mut rx: mpsc::Receiver<Message>,
    shutdown: CancellationToken,
    session_id: String,
) -> JoinHandle<()>
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display,
{
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            if let Err(e) = write.send(message).await {
                error!("Error sending message for session {}: {}", session_id, e);
                shutdown.cancel();
                break;
            }
        }

        if let Err(e) = write.close().await {
            debug!("Error closing transport for session {}: {}", session_id, e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_full_queue_cancels_session() {
        let (tx, _rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let outbound = Outbound::new(tx, shutdown.clone());

        assert!(outbound.send_text("first".to_string()).is_ok());
        assert!(outbound.send_text("second".to_string()).is_err());
        assert!(shutdown.is_cancelled());
        assert!(outbound.send_text("third".to_string()).is_err());
    }

    #[tokio::test]
    async fn test_writer_forwards_in_order() {
        let (sink, stream) = futures::channel::mpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let outbound = Outbound::new(tx, shutdown.clone());
        let writer = spawn_write_task(sink, rx, shutdown, "test".to_string());

        outbound.send_text("a".to_string()).unwrap();
        outbound.send_text("b".to_string()).unwrap();
        drop(outbound);
        writer.await.unwrap();

        let frames: Vec<Message> = stream.collect().await;
        assert_eq!(
            frames,
            vec![Message::Text("a".to_string()), Message::Text("b".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failed_write_cancels_session() {
        let (sink, stream) = futures::channel::mpsc::unbounded::<Message>();
        drop(stream);
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let writer = spawn_write_task(sink, rx, shutdown.clone(), "test".to_string());

        tx.send(Message::Text("lost".to_string())).await.unwrap();
        writer.await.unwrap();

        assert!(shutdown.is_cancelled());
    }
}
