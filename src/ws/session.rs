//! Per-socket plumbing: the writer task and the producer sink.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::net::ConnectionId;
use crate::stream::{StreamError, StreamSink};

/// Drain a connection's outbound queue into the socket.
///
/// When the queue ends (the hub dropped the connection) a close frame is sent.
pub fn spawn_writer(
    id: ConnectionId,
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if let Err(e) = sender.send(message).await {
                tracing::debug!(connection_id = %id, error = %e, "Socket write failed");
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
        let _ = sender.close().await;
        tracing::debug!(connection_id = %id, "Writer finished");
    })
}

/// Producer sink writing each unit as a text frame.
pub struct WsSink {
    sender: SplitSink<WebSocket, Message>,
}

impl WsSink {
    pub fn new(sender: SplitSink<WebSocket, Message>) -> Self {
        Self { sender }
    }

    pub fn into_inner(self) -> SplitSink<WebSocket, Message> {
        self.sender
    }
}

impl StreamSink for WsSink {
    async fn write(&mut self, data: Bytes) -> Result<(), StreamError> {
        let text = String::from_utf8(data.to_vec())
            .map_err(|e| StreamError::SinkWriteFailure(e.to_string()))?;
        self.sender
            .feed(Message::Text(text.into()))
            .await
            .map_err(|e| StreamError::SinkWriteFailure(e.to_string()))
    }

    async fn flush(&mut self) -> Result<(), StreamError> {
        self.sender
            .flush()
            .await
            .map_err(|e| StreamError::SinkWriteFailure(e.to_string()))
    }
}
