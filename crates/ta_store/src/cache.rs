use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use ta_proto::FileId;
use tokio::{
    task::JoinHandle,
    time::{self, Duration},
};
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::journal::Journal;

const JOURNAL_FILE: &str = "journal.bin";
const STAGING_DIR: &str = "staging";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub retention_days: u32,
    /// 0 disables the background sweeper; the sweep at open still runs.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("tonearm-cache"),
            retention_days: 7,
            sweep_interval_secs: 3600,
        }
    }
}

struct CacheInner {
    root: PathBuf,
    chunk_size: u64,
    retention: chrono::Duration,
    journal: Mutex<Journal>,
    /// Ids whose caching failed in this process. Locked after `journal`.
    disabled: Mutex<HashSet<FileId>>,
}

/// Handle to the cache directory. Clone to share between streams.
#[derive(Clone)]
pub struct DiskCache {
    inner: Arc<CacheInner>,
}

impl DiskCache {
    /// Open (or create) the cache at `config.directory` and sweep expired
    /// entries.
    pub fn open(config: &CacheConfig, chunk_size: usize) -> Result<Self, CacheError> {
        let root = config.directory.clone();
        fs::create_dir_all(&root)?;
        let staging = root.join(STAGING_DIR);
        cleanup_staging_dir(&staging);
        let journal = Journal::open(root.join(JOURNAL_FILE), &staging)?;

        let cache = Self {
            inner: Arc::new(CacheInner {
                root,
                chunk_size: chunk_size as u64,
                retention: chrono::Duration::days(config.retention_days as i64),
                journal: Mutex::new(journal),
                disabled: Mutex::new(HashSet::new()),
            }),
        };
        let removed = cache.sweep()?;
        info!(
            root = %cache.root().display(),
            entries = cache.inner.journal.lock().len(),
            removed,
            "cache opened"
        );
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size as usize
    }

    pub fn contains(&self, id: &FileId) -> bool {
        self.inner.journal.lock().contains(id)
    }

    /// Whether caching was turned off for `id` after a failure.
    pub fn is_disabled(&self, id: &FileId) -> bool {
        self.inner.disabled.lock().contains(id)
    }

    pub fn entry(&self, id: FileId) -> CacheEntry {
        CacheEntry {
            cache: self.clone(),
            id,
            file: Mutex::new(None),
        }
    }

    pub fn sweep(&self) -> Result<usize, CacheError> {
        self.sweep_at(Utc::now())
    }

    /// Remove every entry created more than the retention period before
    /// `now`, plus entries with no creation stamp.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let mut journal = self.inner.journal.lock();
        let expired: Vec<FileId> = journal
            .ids()
            .into_iter()
            .filter(|id| match journal.created_at(id) {
                Some(created) => now - created > self.inner.retention,
                None => true,
            })
            .collect();

        for id in &expired {
            journal.remove(id)?;
            remove_if_exists(&self.chunk_path(id))?;
            debug!(file_id = %id, "evicted cache entry");
        }
        Ok(expired.len())
    }

    fn chunk_path(&self, id: &FileId) -> PathBuf {
        self.inner.root.join(id.to_hex())
    }
}

/// Cached state of one file id. Owns the chunk file handle for that id.
pub struct CacheEntry {
    cache: DiskCache,
    id: FileId,
    file: Mutex<Option<File>>,
}

impl CacheEntry {
    pub fn file_id(&self) -> FileId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.cache.contains(&self.id)
    }

    pub fn is_disabled(&self) -> bool {
        self.cache.is_disabled(&self.id)
    }

    pub fn has_chunk(&self, index: u32) -> bool {
        self.cache.inner.journal.lock().has_chunk(&self.id, index)
    }

    pub fn header(&self, header_id: u8) -> Option<Vec<u8>> {
        self.cache.inner.journal.lock().header(&self.id, header_id)
    }

    pub fn write_header(&self, header_id: u8, data: &[u8]) -> Result<(), CacheError> {
        let mut journal = self.cache.inner.journal.lock();
        self.check_enabled()?;
        journal.ensure(self.id, Utc::now())?;
        journal.set_header(&self.id, header_id, data)
    }

    /// Read `len` bytes of chunk `index`. Fewer bytes on disk than recorded
    /// is reported as `ShortChunk`.
    pub fn read_chunk(&self, index: u32, len: usize) -> Result<Vec<u8>, CacheError> {
        if !self.has_chunk(index) {
            return Err(CacheError::MissingChunk { index });
        }

        let mut guard = self.file.lock();
        let file = self.open_file(&mut guard)?;
        file.seek(SeekFrom::Start(index as u64 * self.cache.inner.chunk_size))?;

        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        if filled < len {
            return Err(CacheError::ShortChunk {
                index,
                expected: len,
                actual: filled,
            });
        }
        Ok(buf)
    }

    /// Write chunk bytes, then record the chunk as present.
    pub fn write_chunk(&self, index: u32, data: &[u8]) -> Result<(), CacheError> {
        {
            let mut journal = self.cache.inner.journal.lock();
            self.check_enabled()?;
            journal.ensure(self.id, Utc::now())?;
        }

        let mut guard = self.file.lock();
        let file = self.open_file(&mut guard)?;
        file.seek(SeekFrom::Start(index as u64 * self.cache.inner.chunk_size))?;
        file.write_all(data)?;
        file.flush()?;
        drop(guard);

        let mut journal = self.cache.inner.journal.lock();
        if !self.is_disabled() {
            return journal.set_chunk(&self.id, index);
        }
        drop(journal);
        // Disabled while the bytes were being written.
        *self.file.lock() = None;
        remove_if_exists(&self.cache.chunk_path(&self.id))?;
        Err(CacheError::Disabled)
    }

    /// Delete the chunk file and the journal record.
    pub fn remove(&self) -> Result<(), CacheError> {
        let mut guard = self.file.lock();
        *guard = None;
        let existed = self.cache.inner.journal.lock().remove(&self.id)?;
        remove_if_exists(&self.cache.chunk_path(&self.id))?;
        if existed {
            debug!(file_id = %self.id, "removed cache entry");
        }
        Ok(())
    }

    /// Stop caching this id for the life of the cache handle and delete what
    /// is stored. Returns false if it was already disabled.
    pub fn disable(&self) -> Result<bool, CacheError> {
        {
            let _journal = self.cache.inner.journal.lock();
            if !self.cache.inner.disabled.lock().insert(self.id) {
                return Ok(false);
            }
        }
        self.remove()?;
        Ok(true)
    }

    fn check_enabled(&self) -> Result<(), CacheError> {
        if self.is_disabled() {
            return Err(CacheError::Disabled);
        }
        Ok(())
    }

    fn open_file<'a>(&self, slot: &'a mut Option<File>) -> Result<&'a mut File, CacheError> {
        if slot.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(self.cache.chunk_path(&self.id))?;
            *slot = Some(file);
        }
        slot.as_mut()
            .ok_or_else(|| CacheError::Journal("chunk file handle unavailable".into()))
    }
}

/// Periodically run the retention sweep on a blocking worker.
pub fn spawn_sweeper(cache: DiskCache, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        // The first tick fires immediately; open() already swept.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let c = cache.clone();
            match tokio::task::spawn_blocking(move || c.sweep()).await {
                Ok(Ok(0)) => {}
                Ok(Ok(removed)) => info!(removed, "cache sweep"),
                Ok(Err(err)) => warn!(error = %err, "cache sweep failed"),
                Err(err) => warn!(error = %err, "cache sweep task failed"),
            }
        }
    })
}

fn remove_if_exists(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Remove leftover staging files from a crash mid-rewrite.
fn cleanup_staging_dir(staging: &Path) {
    if let Ok(entries) = fs::read_dir(staging) {
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().ends_with(".staging") {
                warn!(path = %entry.path().display(), "removing orphaned journal staging file");
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}
