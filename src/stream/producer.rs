//! Cadence-driven stream producer.
//!
//! One producer call drives one session to completion: render a unit, frame
//! it, write, flush, wait for the next tick. Cancellation and peer closure are
//! observed only while waiting, so a unit is never cut in half.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::{Instant, MissedTickBehavior};

use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::stream::session::{Bound, Framing, StreamSession};
use crate::stream::sink::StreamSink;
use crate::stream::units::UnitContext;
use crate::transfer::{encode_chunk, encode_terminator};

/// Shortest ticker period for duration-bounded streams.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("sink write failed: {0}")]
    SinkWriteFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Every unit was written, followed by trailer and terminator.
    Completed,
    /// Cancellation fired between units; nothing further was written.
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct StreamSummary {
    /// Units written, excluding trailer and terminator.
    pub units: u64,
    pub outcome: StreamOutcome,
    pub elapsed: Duration,
}

enum Wake {
    Ready,
    Cancelled,
    PeerClosed,
}

/// Drive `session` into `sink` until its bound is reached or `cancel` fires.
pub async fn run<S: StreamSink>(
    session: &StreamSession,
    sink: &mut S,
    cancel: &mut ShutdownSignal,
) -> Result<StreamSummary, StreamError> {
    let start = Instant::now();
    let mut units = 0u64;

    let result = match session.bound {
        Bound::Count(total) => run_counted(session, total, sink, cancel, &mut units).await,
        Bound::Duration(duration) => {
            run_timed(session, start, duration, sink, cancel, &mut units).await
        }
    };
    metrics::record_stream_units(session.unit.label(), units);

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::debug!(unit = session.unit.label(), units, error = %e, "Stream aborted");
            return Err(e);
        }
    };

    if outcome == StreamOutcome::Completed {
        finish(session, sink, units).await?;
    }

    let summary = StreamSummary {
        units,
        outcome,
        elapsed: start.elapsed(),
    };
    tracing::debug!(
        unit = session.unit.label(),
        units,
        outcome = ?summary.outcome,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "Stream finished"
    );
    Ok(summary)
}

async fn run_counted<S: StreamSink>(
    session: &StreamSession,
    total: u64,
    sink: &mut S,
    cancel: &mut ShutdownSignal,
    units: &mut u64,
) -> Result<StreamOutcome, StreamError> {
    let start = Instant::now();
    for index in 1..=total {
        if cancel.is_triggered() {
            return Ok(StreamOutcome::Cancelled);
        }
        let ctx = UnitContext {
            index,
            total: Some(total),
            elapsed: start.elapsed(),
            remaining: None,
        };
        emit(session.framing, sink, session.unit.render(&ctx)).await?;
        *units += 1;

        if index < total && !session.cadence.is_zero() {
            match pause(session.cadence, sink, cancel).await {
                Wake::Ready => {}
                Wake::Cancelled => return Ok(StreamOutcome::Cancelled),
                Wake::PeerClosed => return Err(peer_closed()),
            }
        }
    }
    Ok(StreamOutcome::Completed)
}

async fn run_timed<S: StreamSink>(
    session: &StreamSession,
    start: Instant,
    duration: Duration,
    sink: &mut S,
    cancel: &mut ShutdownSignal,
    units: &mut u64,
) -> Result<StreamOutcome, StreamError> {
    let deadline = start + duration;
    let period = session.cadence.max(MIN_INTERVAL);
    let mut ticker = tokio::time::interval_at(start + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.recv() => return Ok(StreamOutcome::Cancelled),
            _ = sink.closed() => return Err(peer_closed()),
            _ = tokio::time::sleep_until(deadline) => return Ok(StreamOutcome::Completed),
            _ = ticker.tick() => {}
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(StreamOutcome::Completed);
        }
        let ctx = UnitContext {
            index: *units + 1,
            total: None,
            elapsed: now - start,
            remaining: Some(deadline - now),
        };
        emit(session.framing, sink, session.unit.render(&ctx)).await?;
        *units += 1;
    }
}

async fn pause<S: StreamSink>(delay: Duration, sink: &S, cancel: &mut ShutdownSignal) -> Wake {
    tokio::select! {
        biased;
        _ = cancel.recv() => Wake::Cancelled,
        _ = sink.closed() => Wake::PeerClosed,
        _ = tokio::time::sleep(delay) => Wake::Ready,
    }
}

async fn emit<S: StreamSink>(framing: Framing, sink: &mut S, unit: Bytes) -> Result<(), StreamError> {
    let framed = match framing {
        Framing::Chunked => encode_chunk(&unit),
        Framing::Raw => unit,
    };
    if !framed.is_empty() {
        sink.write(framed).await?;
    }
    sink.flush().await
}

async fn finish<S: StreamSink>(
    session: &StreamSession,
    sink: &mut S,
    units: u64,
) -> Result<(), StreamError> {
    if let Some(trailer) = session.unit.trailer(units) {
        emit(session.framing, sink, trailer).await?;
    }
    if session.framing == Framing::Chunked {
        sink.write(encode_terminator()).await?;
        sink.flush().await?;
    }
    Ok(())
}

fn peer_closed() -> StreamError {
    StreamError::SinkWriteFailure("peer closed the stream".into())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::stream::sink::ChannelSink;
    use crate::stream::units::UnitKind;
    use crate::transfer::ChunkDecoder;

    /// In-memory sink recording every flushed frame.
    #[derive(Debug, Default)]
    pub(crate) struct MemorySink {
        pub pending: Vec<u8>,
        pub frames: Vec<Bytes>,
        pub fail_after_frames: Option<usize>,
    }

    impl MemorySink {
        pub fn concat(&self) -> Vec<u8> {
            self.frames.iter().flat_map(|f| f.iter().copied()).collect()
        }
    }

    impl StreamSink for MemorySink {
        async fn write(&mut self, data: Bytes) -> Result<(), StreamError> {
            if self.fail_after_frames.is_some_and(|n| self.frames.len() >= n) {
                return Err(StreamError::SinkWriteFailure("broken pipe".into()));
            }
            self.pending.extend_from_slice(&data);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), StreamError> {
            if !self.pending.is_empty() {
                self.frames.push(Bytes::from(std::mem::take(&mut self.pending)));
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn counted_chunked_stream_ends_with_terminator() {
        let session =
            StreamSession::counted(UnitKind::JsonChunk, 4, Duration::from_millis(500)).chunked();
        let mut sink = MemorySink::default();

        let summary = run(&session, &mut sink, &mut ShutdownSignal::never())
            .await
            .unwrap();
        assert_eq!(summary.units, 4);
        assert_eq!(summary.outcome, StreamOutcome::Completed);
        // Three pauses between four units.
        assert!(summary.elapsed >= Duration::from_millis(1500));

        let body = sink.concat();
        assert!(body.ends_with(b"0\r\n\r\n"));
        let mut decoder = ChunkDecoder::new(&body[..]);
        let mut ids = Vec::new();
        while let Some(chunk) = decoder.next_chunk().await.unwrap() {
            let value: serde_json::Value = serde_json::from_slice(&chunk.payload).unwrap();
            ids.push(value["chunk_id"].as_u64().unwrap());
        }
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(decoder.is_finished());
    }

    #[tokio::test]
    async fn raw_stream_has_one_frame_per_unit() {
        let session = StreamSession::counted(UnitKind::Line, 3, Duration::ZERO);
        let mut sink = MemorySink::default();

        run(&session, &mut sink, &mut ShutdownSignal::never())
            .await
            .unwrap();
        assert_eq!(sink.frames.len(), 3);
        assert!(sink.frames[2].starts_with(b"line 3 - timestamp: "));
    }

    #[tokio::test]
    async fn trailer_follows_last_unit() {
        let session = StreamSession::counted(UnitKind::Event, 2, Duration::ZERO);
        let mut sink = MemorySink::default();

        run(&session, &mut sink, &mut ShutdownSignal::never())
            .await
            .unwrap();
        assert_eq!(sink.frames.len(), 3);
        assert_eq!(sink.frames[2], Bytes::from_static(b"data: [DONE]\n\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_stream_stops_at_deadline() {
        let session = StreamSession::timed(
            UnitKind::JsonChunk,
            Duration::from_secs(1),
            Duration::from_millis(250),
        );
        let mut sink = MemorySink::default();

        let summary = run(&session, &mut sink, &mut ShutdownSignal::never())
            .await
            .unwrap();
        // Ticks at 250, 500 and 750 ms; the 1000 ms tick coincides with the deadline.
        assert_eq!(summary.units, 3);
        assert_eq!(summary.outcome, StreamOutcome::Completed);
        assert_eq!(summary.elapsed, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn write_failure_stops_the_run() {
        let session = StreamSession::counted(UnitKind::Line, 10, Duration::ZERO);
        let mut sink = MemorySink {
            fail_after_frames: Some(2),
            ..Default::default()
        };

        let result = run(&session, &mut sink, &mut ShutdownSignal::never()).await;
        assert!(matches!(result, Err(StreamError::SinkWriteFailure(_))));
        assert_eq!(sink.frames.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_between_units_writes_nothing_more() {
        let shutdown = Shutdown::new();
        let mut cancel = shutdown.subscribe();
        let session =
            StreamSession::counted(UnitKind::JsonChunk, 100, Duration::from_secs(1)).chunked();
        let mut sink = MemorySink::default();

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            shutdown.trigger();
        };
        let (summary, ()) = tokio::join!(run(&session, &mut sink, &mut cancel), stopper);
        let summary = summary.unwrap();

        assert_eq!(summary.outcome, StreamOutcome::Cancelled);
        assert_eq!(summary.units, 3);
        assert_eq!(sink.frames.len(), 3);
        assert!(!sink.concat().ends_with(b"0\r\n\r\n"));
    }

    /// Take the first frame, check nothing else is queued, then hang up.
    async fn hang_up_after_first_frame(mut rx: tokio::sync::mpsc::Receiver<Bytes>) -> Bytes {
        let first = rx.recv().await.unwrap();
        assert!(rx.try_recv().is_err());
        first
    }

    #[tokio::test(start_paused = true)]
    async fn counted_stream_stops_when_client_leaves_mid_pause() {
        let session = StreamSession::counted(UnitKind::Line, 10, Duration::from_secs(1));
        let (mut sink, rx) = ChannelSink::new(4);

        let mut shutdown = ShutdownSignal::never();
        let begun = Instant::now();
        let (result, first) = tokio::join!(
            run(&session, &mut sink, &mut shutdown),
            hang_up_after_first_frame(rx),
        );

        assert!(first.starts_with(b"line 1 - timestamp: "));
        assert!(matches!(result, Err(StreamError::SinkWriteFailure(_))));
        assert!(begun.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_stream_stops_when_client_leaves_between_ticks() {
        let session = StreamSession::timed(
            UnitKind::JsonChunk,
            Duration::from_secs(10),
            Duration::from_secs(1),
        );
        let (mut sink, rx) = ChannelSink::new(4);

        let mut shutdown = ShutdownSignal::never();
        let begun = Instant::now();
        let (result, first) = tokio::join!(
            run(&session, &mut sink, &mut shutdown),
            hang_up_after_first_frame(rx),
        );

        let value: serde_json::Value = serde_json::from_slice(&first).unwrap();
        assert_eq!(value["chunk_id"], 1);
        assert!(matches!(result, Err(StreamError::SinkWriteFailure(_))));
        // First tick at 1 s, gone before the second.
        assert!(begun.elapsed() < Duration::from_secs(2));
    }
}
