//! In-memory chunk loader for stream tests.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use ta_session::{ChunkBuffer, ChunkLoader, ChunkedStream};

pub struct MemoryLoader {
    data: Vec<u8>,
    chunk_size: usize,
    pub requests: Mutex<Vec<u32>>,
    /// Chunks left pending until `release`.
    held: Mutex<HashSet<u32>>,
    /// Chunks failed once, then served.
    fail_once: Mutex<HashSet<u32>>,
    /// Chunks answered with half their bytes.
    short: HashSet<u32>,
}

impl MemoryLoader {
    pub fn new(data: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            data,
            chunk_size,
            requests: Mutex::new(Vec::new()),
            held: Mutex::new(HashSet::new()),
            fail_once: Mutex::new(HashSet::new()),
            short: HashSet::new(),
        }
    }

    pub fn hold(self, index: u32) -> Self {
        self.held.lock().insert(index);
        self
    }

    pub fn fail_once(self, index: u32) -> Self {
        self.fail_once.lock().insert(index);
        self
    }

    pub fn short(mut self, index: u32) -> Self {
        self.short.insert(index);
        self
    }

    pub fn requested(&self) -> Vec<u32> {
        let mut out = self.requests.lock().clone();
        out.sort_unstable();
        out
    }

    /// Open a stream over this loader.
    pub fn open(self, preload: u32) -> (Arc<Self>, ChunkedStream) {
        let loader = Arc::new(self);
        let buffer = Arc::new(ChunkBuffer::new(loader.chunk_size, None));
        let stream = ChunkedStream::open(buffer, loader.clone(), preload).unwrap();
        (loader, stream)
    }
}

impl ChunkLoader for MemoryLoader {
    fn load(&self, index: u32, buffer: Arc<ChunkBuffer>) {
        self.requests.lock().push(index);
        buffer.set_size(self.data.len() as u64);
        if self.held.lock().contains(&index) {
            return;
        }
        if self.fail_once.lock().remove(&index) {
            buffer.fail(index, format!("chunk {index} unavailable"));
            return;
        }
        let start = (index as usize * self.chunk_size).min(self.data.len());
        let mut end = (start + self.chunk_size).min(self.data.len());
        if self.short.contains(&index) {
            end = start + (end - start) / 2;
        }
        buffer.complete(index, self.data[start..end].to_vec());
    }
}
