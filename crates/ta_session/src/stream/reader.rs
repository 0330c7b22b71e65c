use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use bytes::Bytes;

use super::buffer::ChunkBuffer;

/// Fetches chunks into a [`ChunkBuffer`]. `load` must return without
/// blocking; the result is reported through `complete`/`fail`.
pub trait ChunkLoader: Send + Sync {
    fn load(&self, index: u32, buffer: Arc<ChunkBuffer>);
}

/// Closes a stream from another thread, waking a blocked read.
#[derive(Clone)]
pub struct StreamCloser {
    buffer: Arc<ChunkBuffer>,
}

impl StreamCloser {
    pub fn close(&self) {
        self.buffer.close();
    }
}

/// Blocking, seekable reader over chunked content.
///
/// Reads take `&mut self`, so a stream has at most one reader at a time.
/// Share it across threads by moving it, not by cloning.
pub struct ChunkedStream {
    buffer: Arc<ChunkBuffer>,
    loader: Arc<dyn ChunkLoader>,
    size: u64,
    pos: u64,
    mark: Option<u64>,
    preload: u32,
    current: Option<(u32, Bytes)>,
}

impl ChunkedStream {
    /// Request chunk 0 and block until the content size is known.
    pub fn open(
        buffer: Arc<ChunkBuffer>,
        loader: Arc<dyn ChunkLoader>,
        preload: u32,
    ) -> io::Result<Self> {
        if buffer.try_request(0) {
            loader.load(0, buffer.clone());
        }
        let size = buffer.wait_size()?;
        Ok(Self {
            buffer,
            loader,
            size,
            pos: 0,
            mark: None,
            preload,
            current: None,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn closer(&self) -> StreamCloser {
        StreamCloser {
            buffer: self.buffer.clone(),
        }
    }

    pub fn close(&mut self) {
        self.current = None;
        self.buffer.close();
    }

    pub fn mark(&mut self) {
        self.mark = Some(self.pos);
    }

    pub fn reset(&mut self) -> io::Result<()> {
        let mark = self
            .mark
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "reset without mark"))?;
        self.pos = mark;
        Ok(())
    }

    /// Advance up to `n` bytes. Chunks at the new position are requested;
    /// the call only blocks when it lands in the chunk already being read.
    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        self.check_open()?;
        let target = self.pos.saturating_add(n).min(self.size);
        let skipped = target - self.pos;
        let from = self.chunk_of(self.pos);
        self.pos = target;
        if self.pos < self.size {
            let to = self.chunk_of(self.pos);
            self.request_window(to);
            if to == from {
                self.chunk(to)?;
            }
        }
        Ok(skipped)
    }

    fn check_open(&self) -> io::Result<()> {
        if self.buffer.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream closed"));
        }
        Ok(())
    }

    fn chunk_of(&self, pos: u64) -> u32 {
        (pos / self.buffer.chunk_size() as u64) as u32
    }

    fn last_chunk(&self) -> u32 {
        self.chunk_of(self.size.saturating_sub(1))
    }

    fn request_window(&self, index: u32) {
        let end = index.saturating_add(self.preload).min(self.last_chunk());
        for i in index..=end {
            if self.buffer.try_request(i) {
                self.loader.load(i, self.buffer.clone());
            }
        }
    }

    fn chunk(&mut self, index: u32) -> io::Result<Bytes> {
        if let Some((cached, data)) = &self.current {
            if *cached == index {
                return Ok(data.clone());
            }
        }
        let data = self.buffer.wait_chunk(index)?;
        self.current = Some((index, data.clone()));
        Ok(data)
    }
}

impl Read for ChunkedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_open()?;
        if buf.is_empty() || self.pos >= self.size {
            return Ok(0);
        }

        let index = self.chunk_of(self.pos);
        self.request_window(index);
        let chunk = self.chunk(index)?;

        let offset = (self.pos % self.buffer.chunk_size() as u64) as usize;
        if offset >= chunk.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("chunk {index} holds {} bytes, need offset {offset}", chunk.len()),
            ));
        }
        let n = buf.len().min(chunk.len() - offset);
        buf[..n].copy_from_slice(&chunk[offset..offset + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for ChunkedStream {
    fn seek(&mut self, to: SeekFrom) -> io::Result<u64> {
        let target = match to {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;
        self.pos = target.min(self.size);
        Ok(self.pos)
    }
}

impl Drop for ChunkedStream {
    fn drop(&mut self) {
        self.buffer.close();
    }
}
