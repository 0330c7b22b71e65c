//! Cache-first chunk loading for one file.
//!
//! A chunk is served from the disk cache when present. Otherwise it is
//! fetched over a channel, written through to the cache, and only then handed
//! to the stream. Channel errors re-request from the network up to the
//! configured retry count. A cache failure drops the file's cache entry and
//! sends every later chunk of that file to the network, for every stream
//! sharing the same `DiskCache`.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use ta_crypto::{AudioDecrypt, AudioKey};
use ta_proto::channel::{HEADER_SIZE_ID, WORD_SIZE};
use ta_proto::{FileId, ItemGid};
use ta_store::{CacheEntry, CacheError, DiskCache};
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};

use crate::audio_key::AudioKeyProvider;
use crate::channel::{ChannelError, ChannelManager, ChannelSink};
use crate::config::StreamConfig;
use crate::error::SessionError;
use crate::session::Session;
use crate::stream::{ChunkBuffer, ChunkLoader, ChunkedStream};

struct LoaderInner {
    file_id: FileId,
    chunk_size: usize,
    max_retries: u32,
    channels: Arc<ChannelManager>,
    cache: Option<CacheEntry>,
    runtime: Handle,
}

pub struct ContentLoader {
    inner: Arc<LoaderInner>,
}

impl ContentLoader {
    pub fn new(
        file_id: FileId,
        stream: &StreamConfig,
        channels: Arc<ChannelManager>,
        cache: Option<CacheEntry>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                file_id,
                chunk_size: stream.chunk_size,
                max_retries: stream.max_chunk_retries,
                channels,
                cache,
                runtime,
            }),
        }
    }

    pub fn caching(&self) -> bool {
        self.inner.caching()
    }
}

impl ChunkLoader for ContentLoader {
    fn load(&self, index: u32, buffer: Arc<ChunkBuffer>) {
        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move { inner.fetch(index, buffer).await });
    }
}

impl Drop for ContentLoader {
    fn drop(&mut self) {
        let released = self.inner.channels.release_abandoned();
        if released > 0 {
            debug!(file_id = %self.inner.file_id, released, "released channels of closed stream");
        }
    }
}

impl LoaderInner {
    fn caching(&self) -> bool {
        self.cache.as_ref().is_some_and(|entry| !entry.is_disabled())
    }

    async fn fetch(self: Arc<Self>, index: u32, buffer: Arc<ChunkBuffer>) {
        if self.caching() {
            let this = self.clone();
            let cached_buffer = buffer.clone();
            match tokio::task::spawn_blocking(move || this.serve_cached(index, &cached_buffer)).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(err) => warn!(error = %err, "cache read task failed"),
            }
        }
        self.request_network(index, buffer, 0).await;
    }

    /// Complete `index` from the cache. Returns false when the network has to
    /// be asked instead.
    fn serve_cached(&self, index: u32, buffer: &Arc<ChunkBuffer>) -> bool {
        let Some(entry) = self.cache.as_ref().filter(|_| self.caching()) else {
            return false;
        };
        if !entry.has_chunk(index) {
            return false;
        }
        if buffer.size().is_none() {
            let size = entry
                .header(HEADER_SIZE_ID)
                .and_then(|raw| <[u8; 4]>::try_from(raw.as_slice()).ok())
                .map(|raw| u32::from_be_bytes(raw) as u64 * WORD_SIZE);
            match size {
                Some(size) => buffer.set_size(size),
                None => return false,
            }
        }
        let Some(len) = buffer.expected_len(index) else {
            return false;
        };

        match entry.read_chunk(index, len) {
            Ok(data) => {
                trace!(file_id = %self.file_id, index, "chunk served from cache");
                buffer.complete(index, data);
                true
            }
            Err(err) => {
                warn!(file_id = %self.file_id, index, error = %err, "cached chunk unreadable");
                self.disable_cache();
                false
            }
        }
    }

    async fn request_network(self: Arc<Self>, index: u32, buffer: Arc<ChunkBuffer>, attempt: u32) {
        if buffer.is_closed() {
            return;
        }
        let sink = Arc::new(ChunkSink {
            loader: self.clone(),
            index,
            buffer: buffer.clone(),
            attempt,
            size_words: Mutex::new(None),
        });
        if let Err(err) = self
            .channels
            .request(self.file_id, index, self.chunk_size, sink)
            .await
        {
            buffer.fail(index, format!("chunk {index} request failed: {err}"));
        }
    }

    fn write_through(&self, index: u32, data: &[u8], size_words: Option<u32>) {
        let Some(entry) = self.cache.as_ref().filter(|_| self.caching()) else {
            return;
        };
        let result = size_words
            .map(|words| entry.write_header(HEADER_SIZE_ID, &words.to_be_bytes()))
            .unwrap_or(Ok(()))
            .and_then(|()| entry.write_chunk(index, data));
        match result {
            Ok(()) => {}
            Err(CacheError::Disabled) => trace!(file_id = %self.file_id, index, "caching disabled, chunk not stored"),
            Err(err) => {
                warn!(file_id = %self.file_id, index, error = %err, "cache write failed, caching disabled for file");
                self.disable_cache();
            }
        }
    }

    fn disable_cache(&self) {
        let Some(entry) = &self.cache else {
            return;
        };
        match entry.disable() {
            Ok(true) => info!(file_id = %self.file_id, "cache entry dropped"),
            Ok(false) => {}
            Err(err) => warn!(file_id = %self.file_id, error = %err, "could not remove cache entry"),
        }
    }
}

struct ChunkSink {
    loader: Arc<LoaderInner>,
    index: u32,
    buffer: Arc<ChunkBuffer>,
    attempt: u32,
    size_words: Mutex<Option<u32>>,
}

impl ChannelSink for ChunkSink {
    fn on_header(&self, id: u8, data: &[u8]) {
        if id != HEADER_SIZE_ID {
            return;
        }
        if let Ok(raw) = <[u8; 4]>::try_from(data) {
            let words = u32::from_be_bytes(raw);
            *self.size_words.lock() = Some(words);
            self.buffer.set_size(words as u64 * WORD_SIZE);
        }
    }

    fn on_complete(&self, data: Bytes) {
        let loader = self.loader.clone();
        let buffer = self.buffer.clone();
        let index = self.index;
        let words = *self.size_words.lock();
        self.loader.runtime.spawn_blocking(move || {
            loader.write_through(index, &data, words);
            buffer.complete(index, data.to_vec());
        });
    }

    fn on_error(&self, err: ChannelError) {
        if self.buffer.is_closed() {
            return;
        }
        if self.attempt < self.loader.max_retries {
            debug!(index = self.index, attempt = self.attempt + 1, error = %err, "re-requesting chunk");
            let loader = self.loader.clone();
            let buffer = self.buffer.clone();
            let (index, attempt) = (self.index, self.attempt + 1);
            self.loader
                .runtime
                .spawn(async move { loader.request_network(index, buffer, attempt).await });
        } else {
            warn!(index = self.index, error = %err, "chunk failed after retries");
            self.buffer.fail(self.index, err.to_string());
        }
    }

    fn is_abandoned(&self) -> bool {
        self.buffer.is_closed()
    }
}

/// Open a stream over `file_id`, decrypting with `key` if given. Blocks a
/// worker thread until the content size is known.
pub async fn open_stream(
    session: &Session,
    file_id: FileId,
    key: Option<AudioKey>,
    cache: Option<&DiskCache>,
) -> Result<ChunkedStream, SessionError> {
    let config = session.config().stream.clone();
    let entry = cache.and_then(|cache| {
        if cache.chunk_size() == config.chunk_size {
            Some(cache.entry(file_id))
        } else {
            warn!(
                cache = cache.chunk_size(),
                stream = config.chunk_size,
                "cache chunk size differs from stream chunk size, not caching"
            );
            None
        }
    });

    let decrypt = key.map(|key| AudioDecrypt::new(key, config.chunk_size));
    let buffer = Arc::new(ChunkBuffer::new(config.chunk_size, decrypt));
    let loader: Arc<dyn ChunkLoader> = Arc::new(ContentLoader::new(
        file_id,
        &config,
        session.channels(),
        entry,
        Handle::current(),
    ));

    let preload = config.preload_chunks;
    let stream = tokio::task::spawn_blocking(move || ChunkedStream::open(buffer, loader, preload))
        .await
        .map_err(|e| SessionError::Transport(format!("stream open task failed: {e}")))??;
    info!(%file_id, size = stream.size(), "content stream opened");
    Ok(stream)
}

/// Fetch the file's audio key, then open a decrypting stream over it.
pub async fn open_audio_stream(
    session: &Session,
    file_id: FileId,
    gid: ItemGid,
    cache: Option<&DiskCache>,
) -> Result<ChunkedStream, SessionError> {
    let key = session.audio_keys().audio_key(gid, file_id).await?;
    open_stream(session, file_id, Some(key), cache).await
}
