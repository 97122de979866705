//! Destinations for stream output.

use std::convert::Infallible;
use std::future::Future;

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures_util::stream;
use tokio::sync::mpsc;

use crate::stream::producer::StreamError;

/// Ordered byte sink with explicit flush.
///
/// `write` may buffer; `flush` pushes everything written so far to the peer.
pub trait StreamSink: Send {
    fn write(&mut self, data: Bytes) -> impl Future<Output = Result<(), StreamError>> + Send;

    fn flush(&mut self) -> impl Future<Output = Result<(), StreamError>> + Send;

    /// Resolves once the peer is gone. Sinks that cannot tell never resolve.
    fn closed(&self) -> impl Future<Output = ()> + Send {
        std::future::pending()
    }
}

/// Sink feeding an HTTP response body.
///
/// Each flush hands one frame to the body stream. The channel closes when
/// hyper drops the body, which is how a client disconnect shows up here.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
    buffer: BytesMut,
}

impl ChannelSink {
    /// Create a sink and the receiver to wrap with [`body_from_receiver`].
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                buffer: BytesMut::new(),
            },
            rx,
        )
    }
}

impl StreamSink for ChannelSink {
    async fn write(&mut self, data: Bytes) -> Result<(), StreamError> {
        if self.tx.is_closed() {
            return Err(StreamError::SinkWriteFailure("client disconnected".into()));
        }
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), StreamError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let frame = self.buffer.split().freeze();
        self.tx
            .send(frame)
            .await
            .map_err(|_| StreamError::SinkWriteFailure("client disconnected".into()))
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Turn the receiving half of a [`ChannelSink`] into a streaming body.
pub fn body_from_receiver(rx: mpsc::Receiver<Bytes>) -> Body {
    Body::from_stream(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok::<_, Infallible>(frame), rx))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flush_sends_buffered_writes_as_one_frame() {
        let (mut sink, mut rx) = ChannelSink::new(4);
        sink.write(Bytes::from_static(b"ab")).await.unwrap();
        sink.write(Bytes::from_static(b"cd")).await.unwrap();
        sink.flush().await.unwrap();
        sink.flush().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"abcd"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_receiver_fails_writes_and_closes() {
        let (mut sink, rx) = ChannelSink::new(1);
        drop(rx);

        sink.closed().await;
        assert!(matches!(
            sink.write(Bytes::from_static(b"x")).await,
            Err(StreamError::SinkWriteFailure(_))
        ));
    }
}
