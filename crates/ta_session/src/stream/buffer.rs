use std::io;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use ta_crypto::AudioDecrypt;
use tracing::trace;

#[derive(Default)]
struct BufferState {
    size: Option<u64>,
    requested: Vec<bool>,
    chunks: Vec<Option<Bytes>>,
    failed: Vec<Option<String>>,
    /// Chunk the reader is parked on, if any.
    waiting: Option<u32>,
    waiting_for_size: bool,
    size_error: Option<String>,
    closed: bool,
}

impl BufferState {
    fn grow(&mut self, index: u32) {
        let needed = index as usize + 1;
        if self.requested.len() < needed {
            self.requested.resize(needed, false);
            self.chunks.resize(needed, None);
            self.failed.resize(needed, None);
        }
    }
}

/// Shared state between a [`ChunkedStream`](super::ChunkedStream) and the
/// loader feeding it. Chunks are decrypted before they become available.
pub struct ChunkBuffer {
    chunk_size: usize,
    decrypt: Option<AudioDecrypt>,
    state: Mutex<BufferState>,
    ready: Condvar,
}

impl ChunkBuffer {
    pub fn new(chunk_size: usize, decrypt: Option<AudioDecrypt>) -> Self {
        Self {
            chunk_size,
            decrypt,
            state: Mutex::new(BufferState::default()),
            ready: Condvar::new(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn size(&self) -> Option<u64> {
        self.state.lock().size
    }

    pub fn chunk_count(&self) -> Option<u32> {
        self.size().map(|size| size.div_ceil(self.chunk_size as u64) as u32)
    }

    /// Bytes chunk `index` holds once complete.
    pub fn expected_len(&self, index: u32) -> Option<usize> {
        let size = self.size()?;
        let start = index as u64 * self.chunk_size as u64;
        Some(size.saturating_sub(start).min(self.chunk_size as u64) as usize)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_requested(&self, index: u32) -> bool {
        self.state
            .lock()
            .requested
            .get(index as usize)
            .copied()
            .unwrap_or(false)
    }

    pub fn is_available(&self, index: u32) -> bool {
        matches!(self.state.lock().chunks.get(index as usize), Some(Some(_)))
    }

    /// Mark `index` requested. Returns false if it already was, is already
    /// available, lies past the end, or the buffer is closed.
    pub fn try_request(&self, index: u32) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        if let Some(size) = state.size {
            if index as u64 * self.chunk_size as u64 >= size {
                return false;
            }
        }
        state.grow(index);
        let i = index as usize;
        if state.requested[i] || state.chunks[i].is_some() {
            return false;
        }
        state.requested[i] = true;
        state.failed[i] = None;
        true
    }

    /// Record the total content size in bytes.
    pub fn set_size(&self, size: u64) {
        let mut state = self.state.lock();
        if state.size.is_some() {
            return;
        }
        state.size = Some(size);
        let count = size.div_ceil(self.chunk_size as u64) as usize;
        let longest = state.requested.len().max(count);
        state.requested.resize(longest, false);
        state.chunks.resize(longest, None);
        state.failed.resize(longest, None);
        trace!(size, chunks = count, "content size known");
        if state.waiting_for_size {
            self.ready.notify_all();
        }
    }

    /// Hand over the raw bytes of chunk `index`. They are decrypted and cut
    /// to the chunk's expected length before being marked available.
    pub fn complete(&self, index: u32, mut data: Vec<u8>) {
        if self.is_closed() {
            return;
        }
        if let Some(decrypt) = &self.decrypt {
            if let Err(err) = decrypt.decrypt_chunk(index, &mut data) {
                self.fail(index, format!("decrypt chunk {index}: {err}"));
                return;
            }
        }
        if let Some(expected) = self.expected_len(index) {
            if data.len() < expected {
                self.fail(
                    index,
                    format!("chunk {index} short: {} of {expected} bytes", data.len()),
                );
                return;
            }
            data.truncate(expected);
        }

        let mut state = self.state.lock();
        state.grow(index);
        let i = index as usize;
        state.chunks[i] = Some(Bytes::from(data));
        state.requested[i] = false;
        state.failed[i] = None;
        if state.waiting == Some(index) {
            self.ready.notify_all();
        }
    }

    /// Fail chunk `index`. A parked reader wakes with an error; a later read
    /// may request the chunk again.
    pub fn fail(&self, index: u32, reason: impl Into<String>) {
        let reason = reason.into();
        let mut state = self.state.lock();
        state.grow(index);
        let i = index as usize;
        state.requested[i] = false;
        state.failed[i] = Some(reason.clone());
        if index == 0 && state.size.is_none() {
            state.size_error = Some(reason);
        }
        if state.waiting == Some(index) || state.waiting_for_size {
            self.ready.notify_all();
        }
    }

    /// Close the buffer and wake any parked reader.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.ready.notify_all();
    }

    /// Block until the content size is known.
    pub fn wait_size(&self) -> io::Result<u64> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(closed());
            }
            if let Some(size) = state.size {
                state.waiting_for_size = false;
                return Ok(size);
            }
            if let Some(reason) = state.size_error.take() {
                state.waiting_for_size = false;
                return Err(io::Error::new(io::ErrorKind::Other, reason));
            }
            state.waiting_for_size = true;
            self.ready.wait(&mut state);
        }
    }

    /// Block until chunk `index` is available or failed.
    pub fn wait_chunk(&self, index: u32) -> io::Result<Bytes> {
        let mut state = self.state.lock();
        state.grow(index);
        let i = index as usize;
        let result = loop {
            if state.closed {
                break Err(closed());
            }
            if let Some(chunk) = &state.chunks[i] {
                break Ok(chunk.clone());
            }
            if let Some(reason) = state.failed[i].take() {
                break Err(io::Error::new(io::ErrorKind::Other, reason));
            }
            state.waiting = Some(index);
            self.ready.wait(&mut state);
        };
        state.waiting = None;
        result
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "stream closed")
}
