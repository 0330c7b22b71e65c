use std::fmt;
use std::str::FromStr;

use crate::error::ProtoError;

pub const FILE_ID_LEN: usize = 20;
pub const ITEM_GID_LEN: usize = 16;

/// Opaque identifier of one piece of remote content (an encoded audio file).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub [u8; FILE_ID_LEN]);

impl FileId {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtoError> {
        let raw: [u8; FILE_ID_LEN] = bytes
            .try_into()
            .map_err(|_| ProtoError::InvalidId(format!("file id must be {FILE_ID_LEN} bytes")))?;
        Ok(Self(raw))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.to_hex())
    }
}

impl FromStr for FileId {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|e| ProtoError::InvalidId(e.to_string()))?;
        Self::from_slice(&raw)
    }
}

/// Global id of the catalogue item a file belongs to; the audio-key request
/// needs both.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ItemGid(pub [u8; ITEM_GID_LEN]);

impl ItemGid {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtoError> {
        let raw: [u8; ITEM_GID_LEN] = bytes
            .try_into()
            .map_err(|_| ProtoError::InvalidId(format!("gid must be {ITEM_GID_LEN} bytes")))?;
        Ok(Self(raw))
    }
}
