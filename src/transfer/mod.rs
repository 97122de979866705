//! Transfer-encoding subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound:  unit bytes → codec::encode_chunk → sink
//!            end of stream → codec::encode_terminator → sink
//!
//! Inbound:   request body → StreamReader (AsyncBufRead)
//!            → codec::ChunkDecoder (one chunk at a time)
//!            → handler (echo chunks, or discard and count)
//! ```

pub mod codec;

pub use codec::{encode_chunk, encode_terminator, Chunk, ChunkDecoder, ChunkError};
