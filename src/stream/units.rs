//! Unit rendering for the streaming producers.

use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Map, Value};

use crate::clock::unix_timestamp;
use crate::ws::envelope::Envelope;

/// SSE end-of-stream marker.
pub const SSE_DONE: &[u8] = b"data: [DONE]\n\n";

/// Where the producer is when it renders a unit.
#[derive(Debug, Clone, Copy)]
pub struct UnitContext {
    /// 1-based position of the unit in the stream.
    pub index: u64,
    /// Total units for count-bounded streams.
    pub total: Option<u64>,
    /// Time since the stream started.
    pub elapsed: Duration,
    /// Time left for duration-bounded streams.
    pub remaining: Option<Duration>,
}

/// What a single unit of a stream looks like on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKind {
    /// `line N - timestamp: T\n`
    Line,
    /// Server-sent event carrying a small JSON object.
    Event,
    /// One JSON object per unit with position and timing counters.
    JsonChunk,
    /// A block of `size` pattern bytes.
    Pattern { size: usize },
    /// A WebSocket envelope of the given type.
    Envelope { kind: String },
}

impl UnitKind {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            UnitKind::Line => "line",
            UnitKind::Event => "event",
            UnitKind::JsonChunk => "json_chunk",
            UnitKind::Pattern { .. } => "pattern",
            UnitKind::Envelope { .. } => "envelope",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            UnitKind::Line => "text/plain; charset=utf-8",
            UnitKind::Event => "text/event-stream",
            UnitKind::JsonChunk | UnitKind::Envelope { .. } => "application/json",
            UnitKind::Pattern { .. } => "application/octet-stream",
        }
    }

    /// Bytes for the unit at `ctx`.
    pub fn render(&self, ctx: &UnitContext) -> Bytes {
        match self {
            UnitKind::Line => Bytes::from(format!(
                "line {} - timestamp: {}\n",
                ctx.index,
                unix_timestamp()
            )),
            UnitKind::Event => {
                let event = json!({
                    "id": ctx.index,
                    "message": format!("event {}", ctx.index),
                    "timestamp": unix_timestamp(),
                });
                Bytes::from(format!("data: {event}\n\n"))
            }
            UnitKind::JsonChunk => Bytes::from(json_chunk(ctx).to_string()),
            UnitKind::Pattern { size } => pattern_block(ctx.index.saturating_sub(1), *size),
            UnitKind::Envelope { kind } => {
                let envelope = Envelope::new(
                    kind.as_str(),
                    json!({
                        "sequence": ctx.index,
                        "total": ctx.total,
                        "content": format!("{kind} message #{}", ctx.index),
                    }),
                );
                Bytes::from(envelope.to_json())
            }
        }
    }

    /// Closing unit written after a completed run, if the kind has one.
    pub fn trailer(&self, units: u64) -> Option<Bytes> {
        match self {
            UnitKind::Event => Some(Bytes::from_static(SSE_DONE)),
            UnitKind::Envelope { kind } => {
                let envelope = Envelope::new(
                    format!("{kind}_complete"),
                    json!({ "sent": units, "message": format!("sent {units} messages") }),
                );
                Some(Bytes::from(envelope.to_json()))
            }
            _ => None,
        }
    }
}

fn json_chunk(ctx: &UnitContext) -> Value {
    let mut chunk = Map::new();
    chunk.insert("chunk_id".into(), ctx.index.into());
    chunk.insert("timestamp".into(), unix_timestamp().into());
    match (ctx.total, ctx.remaining) {
        (Some(total), _) => {
            let data = format!("chunk #{}", ctx.index);
            chunk.insert("size".into(), data.len().into());
            chunk.insert("data".into(), data.into());
            chunk.insert("remaining".into(), total.saturating_sub(ctx.index).into());
        }
        (None, remaining) => {
            chunk.insert("elapsed_ms".into(), (ctx.elapsed.as_millis() as u64).into());
            chunk.insert(
                "remaining_ms".into(),
                (remaining.unwrap_or_default().as_millis() as u64).into(),
            );
            chunk.insert("data".into(), format!("stream chunk #{}", ctx.index).into());
        }
    }
    Value::Object(chunk)
}

/// `size` bytes where byte `j` of block `block` is `(block + j) % 256`.
pub fn pattern_block(block: u64, size: usize) -> Bytes {
    let offset = (block % 256) as usize;
    (0..size).map(|j| ((offset + j) % 256) as u8).collect::<Vec<u8>>().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(index: u64, total: Option<u64>) -> UnitContext {
        UnitContext {
            index,
            total,
            elapsed: Duration::from_millis(1500),
            remaining: total.is_none().then(|| Duration::from_millis(500)),
        }
    }

    #[test]
    fn line_unit_names_its_index() {
        let line = UnitKind::Line.render(&ctx(3, Some(10)));
        let text = std::str::from_utf8(&line).unwrap();
        assert!(text.starts_with("line 3 - timestamp: "));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn event_unit_is_sse_framed_json() {
        let event = UnitKind::Event.render(&ctx(2, Some(5)));
        let text = std::str::from_utf8(&event).unwrap();
        let json = text
            .strip_prefix("data: ")
            .and_then(|t| t.strip_suffix("\n\n"))
            .unwrap();
        let value: Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["id"], 2);
        assert_eq!(UnitKind::Event.trailer(5).unwrap(), Bytes::from_static(SSE_DONE));
    }

    #[test]
    fn counted_json_chunk_reports_remaining() {
        let chunk: Value =
            serde_json::from_slice(&UnitKind::JsonChunk.render(&ctx(4, Some(5)))).unwrap();
        assert_eq!(chunk["chunk_id"], 4);
        assert_eq!(chunk["remaining"], 1);
        assert_eq!(chunk["size"], "chunk #4".len());
    }

    #[test]
    fn timed_json_chunk_reports_clock() {
        let chunk: Value =
            serde_json::from_slice(&UnitKind::JsonChunk.render(&ctx(7, None))).unwrap();
        assert_eq!(chunk["elapsed_ms"], 1500);
        assert_eq!(chunk["remaining_ms"], 500);
        assert!(chunk.get("remaining").is_none());
    }

    #[test]
    fn pattern_block_wraps_at_256() {
        let block = pattern_block(1, 300);
        assert_eq!(block.len(), 300);
        assert_eq!(block[0], 1);
        assert_eq!(block[254], 255);
        assert_eq!(block[255], 0);
        assert!(UnitKind::Pattern { size: 8 }.trailer(1).is_none());
    }

    #[test]
    fn envelope_trailer_names_completion() {
        let kind = UnitKind::Envelope {
            kind: "performance".into(),
        };
        let unit: Envelope = serde_json::from_slice(&kind.render(&ctx(1, Some(2)))).unwrap();
        assert_eq!(unit.kind, "performance");
        assert_eq!(unit.data["sequence"], 1);

        let trailer: Envelope = serde_json::from_slice(&kind.trailer(2).unwrap()).unwrap();
        assert_eq!(trailer.kind, "performance_complete");
        assert_eq!(trailer.data["sent"], 2);
    }
}
