//! Chunked transfer-encoding framing.
//!
//! # Wire Format
//! ```text
//! <size in hex>\r\n
//! <size bytes of payload>\r\n
//! ...
//! 0\r\n
//! \r\n
//! ```
//!
//! # Design Decisions
//! - Encoding is a pure function per chunk; the producer decides when to emit
//!   the terminator
//! - Decoding pulls from an `AsyncBufRead` one chunk at a time, so memory use is
//!   bounded by the largest chunk (or by nothing at all in discard mode)
//! - A decoder is finished after the terminator or the first error

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream::{self, Stream};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Line delimiter used by the framing.
pub const CRLF: &[u8] = b"\r\n";

/// Final chunk ending a chunked body.
pub const TERMINATOR: &[u8] = b"0\r\n\r\n";

/// Upper bound on a chunk-size line, including extensions and the delimiter.
const MAX_SIZE_LINE: u64 = 4096;

/// Errors raised while decoding a chunked body.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// The chunk-size line is not a base-16 integer.
    #[error("malformed chunk size: {line:?}")]
    MalformedChunkSize { line: String },

    /// The source ended before the declared payload length was read.
    #[error("truncated chunk: declared {declared} bytes, received {received}")]
    TruncatedChunk { declared: u64, received: u64 },

    /// Something other than CRLF followed a chunk's payload.
    #[error("expected CRLF after {declared}-byte chunk, found {found:?}")]
    MissingDelimiter { declared: u64, found: String },

    /// The chunk-size line never ended.
    #[error("chunk size line exceeds {0} bytes")]
    LineTooLong(u64),

    /// Underlying reader failed.
    #[error("failed to read chunked body: {0}")]
    Io(#[from] std::io::Error),
}

impl ChunkError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ChunkError::MalformedChunkSize { .. } => "malformed_size",
            ChunkError::TruncatedChunk { .. } => "truncated",
            ChunkError::MissingDelimiter { .. } => "missing_delimiter",
            ChunkError::LineTooLong(_) => "line_too_long",
            ChunkError::Io(_) => "io",
        }
    }
}

/// One decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Declared payload size.
    pub size: u64,
    /// Payload bytes (`size` long).
    pub payload: Bytes,
}

/// Frame a payload as a single chunk: `hex(len) CRLF payload CRLF`.
///
/// An empty payload produces an empty buffer, since a zero-size chunk is
/// reserved for [`encode_terminator`].
pub fn encode_chunk(payload: &[u8]) -> Bytes {
    if payload.is_empty() {
        return Bytes::new();
    }

    let header = format!("{:x}\r\n", payload.len());
    let mut buf = BytesMut::with_capacity(header.len() + payload.len() + CRLF.len());
    buf.put_slice(header.as_bytes());
    buf.put_slice(payload);
    buf.put_slice(CRLF);
    buf.freeze()
}

/// The terminating chunk, `"0\r\n\r\n"`.
pub fn encode_terminator() -> Bytes {
    Bytes::from_static(TERMINATOR)
}

/// Incremental decoder over a buffered async reader.
///
/// Yields chunks lazily; once the terminator is seen, the source is exhausted
/// or an error is returned, every further call yields `None`.
pub struct ChunkDecoder<R> {
    reader: R,
    line: Vec<u8>,
    finished: bool,
    chunks: u64,
    bytes: u64,
}

impl<R> ChunkDecoder<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Wrap a buffered reader positioned at the first chunk-size line.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(32),
            finished: false,
            chunks: 0,
            bytes: 0,
        }
    }

    /// Number of non-terminal chunks decoded so far.
    pub fn chunks_read(&self) -> u64 {
        self.chunks
    }

    /// Total payload bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    /// True once the decoder will yield nothing more.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode the next chunk, materializing its payload.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, ChunkError> {
        let result = self.read_chunk().await;
        self.settle(result)
    }

    /// Discard mode: consume the next chunk without keeping its payload and
    /// return the declared size.
    pub async fn skip_chunk(&mut self) -> Result<Option<u64>, ChunkError> {
        let result = self.discard_chunk().await;
        self.settle(result)
    }

    /// Adapt the decoder into a stream of chunks.
    pub fn into_stream(self) -> impl Stream<Item = Result<Chunk, ChunkError>> {
        stream::unfold(self, |mut decoder| async move {
            match decoder.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), decoder)),
                Ok(None) => None,
                Err(e) => Some((Err(e), decoder)),
            }
        })
    }

    fn settle<T>(&mut self, result: Result<Option<T>, ChunkError>) -> Result<Option<T>, ChunkError> {
        match result {
            Ok(None) | Err(_) => self.finished = true,
            Ok(Some(_)) => self.chunks += 1,
        }
        result
    }

    async fn read_chunk(&mut self) -> Result<Option<Chunk>, ChunkError> {
        let Some(size) = self.read_size().await? else {
            return Ok(None);
        };

        let mut payload = Vec::with_capacity(size.min(64 * 1024) as usize);
        let received = (&mut self.reader).take(size).read_to_end(&mut payload).await? as u64;
        self.bytes += received;
        if received < size {
            return Err(ChunkError::TruncatedChunk { declared: size, received });
        }

        self.consume_delimiter(size).await?;
        Ok(Some(Chunk {
            size,
            payload: Bytes::from(payload),
        }))
    }

    async fn discard_chunk(&mut self) -> Result<Option<u64>, ChunkError> {
        let Some(size) = self.read_size().await? else {
            return Ok(None);
        };

        let mut limited = (&mut self.reader).take(size);
        let received = tokio::io::copy_buf(&mut limited, &mut tokio::io::sink()).await?;
        self.bytes += received;
        if received < size {
            return Err(ChunkError::TruncatedChunk { declared: size, received });
        }

        self.consume_delimiter(size).await?;
        Ok(Some(size))
    }

    /// Read size lines until a non-blank one; `None` means the body ended.
    async fn read_size(&mut self) -> Result<Option<u64>, ChunkError> {
        if self.finished {
            return Ok(None);
        }

        loop {
            self.line.clear();
            let n = (&mut self.reader)
                .take(MAX_SIZE_LINE + 1)
                .read_until(b'\n', &mut self.line)
                .await?;

            if n == 0 {
                // Source exhausted at a line boundary.
                return Ok(None);
            }
            if n as u64 > MAX_SIZE_LINE {
                return Err(ChunkError::LineTooLong(MAX_SIZE_LINE));
            }

            let text = String::from_utf8_lossy(&self.line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }

            // Extensions (";name=value") carry nothing we use.
            let digits = trimmed.split(';').next().unwrap_or_default().trim();
            let size = parse_hex_size(digits).ok_or_else(|| ChunkError::MalformedChunkSize {
                line: trimmed.to_string(),
            })?;

            return Ok((size > 0).then_some(size));
        }
    }

    /// The rest of the payload line must be blank; end of input is tolerated.
    async fn consume_delimiter(&mut self, declared: u64) -> Result<(), ChunkError> {
        self.line.clear();
        (&mut self.reader)
            .take(MAX_SIZE_LINE)
            .read_until(b'\n', &mut self.line)
            .await?;
        if self.line.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        Err(ChunkError::MissingDelimiter {
            declared,
            found: String::from_utf8_lossy(&self.line).into_owned(),
        })
    }
}

fn parse_hex_size(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}
