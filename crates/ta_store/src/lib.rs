//! ta_store — persistent chunk cache for Tonearm content
//!
//! # Layout
//! ```text
//!   <root>/journal.bin       control journal (headers + presence bitmaps)
//!   <root>/<hex file id>     raw chunk bytes at `index * chunk_size`
//!   <root>/staging/          temporary files for atomic journal rewrites
//! ```
//! Chunks are stored exactly as received from the network (still
//! encrypted); decryption happens in the stream layer for both sources.
//!
//! The journal is rewritten in full on every mutation. Entries older than the
//! retention period are swept at open and, optionally, by a background task.

pub mod cache;
pub mod error;
pub mod journal;

pub use cache::{spawn_sweeper, CacheConfig, CacheEntry, DiskCache};
pub use error::CacheError;
pub use journal::{Journal, HEADER_CREATED_AT};
