//! Control journal: one record per cached file id.
//!
//! ```text
//!   b"TAJ1" | u32 entry count | entry*
//!   entry  = [20] file id | u8 header count | header* | u32 chunk count | bitmap
//!   header = u8 id | u16 len | data
//! ```
//! The bitmap holds `ceil(chunk count / 8)` bytes, least significant bit first.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use ta_proto::wire::{put_u16_prefixed, WireReader};
use ta_proto::FileId;
use tracing::warn;

use crate::error::CacheError;

const MAGIC: &[u8; 4] = b"TAJ1";

/// Creation timestamp header, `i64` milliseconds since the epoch.
pub const HEADER_CREATED_AT: u8 = 0xfe;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct JournalEntry {
    headers: Vec<(u8, Vec<u8>)>,
    chunks: Vec<bool>,
}

impl JournalEntry {
    fn header(&self, id: u8) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(hid, _)| *hid == id)
            .map(|(_, data)| data.as_slice())
    }

    fn set_header(&mut self, id: u8, data: &[u8]) {
        match self.headers.iter_mut().find(|(hid, _)| *hid == id) {
            Some((_, existing)) => *existing = data.to_vec(),
            None => self.headers.push((id, data.to_vec())),
        }
    }
}

pub struct Journal {
    path: PathBuf,
    staging: PathBuf,
    entries: HashMap<FileId, JournalEntry>,
}

impl Journal {
    /// Load the journal at `path`. A missing file yields an empty journal; a
    /// corrupt one is discarded with a warning.
    pub fn open(path: impl AsRef<Path>, staging: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        let staging = staging.as_ref().to_path_buf();
        fs::create_dir_all(&staging)?;

        let entries = match fs::read(&path) {
            Ok(raw) => match decode(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "discarding corrupt cache journal");
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path,
            staging,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &FileId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> Vec<FileId> {
        self.entries.keys().copied().collect()
    }

    /// Add a record stamped with `now` if none exists.
    pub fn ensure(&mut self, id: FileId, now: DateTime<Utc>) -> Result<(), CacheError> {
        if self.entries.contains_key(&id) {
            return Ok(());
        }
        let mut entry = JournalEntry::default();
        entry.set_header(HEADER_CREATED_AT, &now.timestamp_millis().to_be_bytes());
        self.entries.insert(id, entry);
        self.persist()
    }

    pub fn has_chunk(&self, id: &FileId, index: u32) -> bool {
        self.entries
            .get(id)
            .and_then(|e| e.chunks.get(index as usize).copied())
            .unwrap_or(false)
    }

    pub fn set_chunk(&mut self, id: &FileId, index: u32) -> Result<(), CacheError> {
        let entry = self.entry_mut(id)?;
        let index = index as usize;
        if entry.chunks.len() <= index {
            entry.chunks.resize(index + 1, false);
        }
        if entry.chunks[index] {
            return Ok(());
        }
        entry.chunks[index] = true;
        self.persist()
    }

    pub fn header(&self, id: &FileId, header_id: u8) -> Option<Vec<u8>> {
        self.entries
            .get(id)
            .and_then(|e| e.header(header_id))
            .map(<[u8]>::to_vec)
    }

    pub fn set_header(&mut self, id: &FileId, header_id: u8, data: &[u8]) -> Result<(), CacheError> {
        self.entry_mut(id)?.set_header(header_id, data);
        self.persist()
    }

    pub fn created_at(&self, id: &FileId) -> Option<DateTime<Utc>> {
        let raw = self.entries.get(id)?.header(HEADER_CREATED_AT)?;
        let millis = i64::from_be_bytes(raw.try_into().ok()?);
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Drop the record. Returns whether one existed.
    pub fn remove(&mut self, id: &FileId) -> Result<bool, CacheError> {
        if self.entries.remove(id).is_none() {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    fn entry_mut(&mut self, id: &FileId) -> Result<&mut JournalEntry, CacheError> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| CacheError::Journal(format!("no record for {id}")))
    }

    fn persist(&self) -> Result<(), CacheError> {
        let bytes = encode(&self.entries)?;
        let staging_path = self.staging.join("journal.bin.staging");
        {
            let mut file = File::create(&staging_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&staging_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            fsync_dir(parent)?;
        }
        Ok(())
    }
}

fn encode(entries: &HashMap<FileId, JournalEntry>) -> Result<Vec<u8>, CacheError> {
    let mut out = Vec::with_capacity(8 + entries.len() * 64);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());

    let mut ids: Vec<&FileId> = entries.keys().collect();
    ids.sort();
    for id in ids {
        let entry = &entries[id];
        out.extend_from_slice(&id.0);
        out.push(entry.headers.len() as u8);
        for (hid, data) in &entry.headers {
            out.push(*hid);
            put_u16_prefixed(&mut out, data)?;
        }
        out.extend_from_slice(&(entry.chunks.len() as u32).to_be_bytes());
        let mut bitmap = vec![0u8; entry.chunks.len().div_ceil(8)];
        for (i, present) in entry.chunks.iter().enumerate() {
            if *present {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        out.extend_from_slice(&bitmap);
    }
    Ok(out)
}

fn decode(raw: &[u8]) -> Result<HashMap<FileId, JournalEntry>, CacheError> {
    let mut r = WireReader::new(raw);
    if r.bytes(MAGIC.len())? != MAGIC {
        return Err(CacheError::Journal("bad magic".into()));
    }
    let count = r.u32()?;
    let mut entries = HashMap::new();
    for _ in 0..count {
        let id = FileId(r.array()?);
        let mut entry = JournalEntry::default();
        let headers = r.u8()?;
        for _ in 0..headers {
            let hid = r.u8()?;
            entry.headers.push((hid, r.u16_prefixed()?.to_vec()));
        }
        let chunks = r.u32()? as usize;
        let bitmap = r.bytes(chunks.div_ceil(8))?;
        entry.chunks = (0..chunks).map(|i| bitmap[i / 8] & (1 << (i % 8)) != 0).collect();
        entries.insert(id, entry);
    }
    if !r.is_empty() {
        return Err(CacheError::Journal(format!("{} trailing bytes", r.remaining())));
    }
    Ok(entries)
}

fn fsync_dir(path: &Path) -> Result<(), CacheError> {
    #[cfg(unix)]
    {
        let dir = OpenOptions::new().read(true).open(path)?;
        dir.sync_all()?;
    }
    Ok(())
}
