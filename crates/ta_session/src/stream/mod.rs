//! Chunked content streams.
//!
//! A [`ChunkedStream`] is the blocking, seekable front; a [`ChunkBuffer`]
//! holds per-chunk state shared with whichever [`ChunkLoader`] fills it.

mod buffer;
mod reader;

pub use buffer::ChunkBuffer;
pub use reader::{ChunkLoader, ChunkedStream, StreamCloser};
