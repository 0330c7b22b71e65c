use bytes::BufMut;

use crate::error::ProtoError;
use crate::ids::{FileId, ItemGid};
use crate::wire::WireReader;

/// `[20] file id | [16] item gid | u32 seq | u16 0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioKeyRequest {
    pub file_id: FileId,
    pub gid: ItemGid,
    pub seq: u32,
}

impl AudioKeyRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(42);
        out.put_slice(&self.file_id.0);
        out.put_slice(&self.gid.0);
        out.put_u32(self.seq);
        out.put_u16(0);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(payload);
        Ok(Self {
            file_id: FileId(r.array()?),
            gid: ItemGid(r.array()?),
            seq: r.u32()?,
        })
    }
}

/// Answer to a key request, correlated by `seq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioKeyResponse {
    Key { seq: u32, key: [u8; 16] },
    Error { seq: u32, code: u16 },
}

impl AudioKeyResponse {
    pub fn seq(&self) -> u32 {
        match self {
            Self::Key { seq, .. } | Self::Error { seq, .. } => *seq,
        }
    }

    pub fn decode_key(payload: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(payload);
        Ok(Self::Key {
            seq: r.u32()?,
            key: r.array()?,
        })
    }

    pub fn decode_error(payload: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(payload);
        Ok(Self::Error {
            seq: r.u32()?,
            code: r.u16()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20);
        match self {
            Self::Key { seq, key } => {
                out.put_u32(*seq);
                out.put_slice(key);
            }
            Self::Error { seq, code } => {
                out.put_u32(*seq);
                out.put_u16(*code);
            }
        }
        out
    }
}
