//! Channel request and response fragments.
//!
//! A request asks for a word range of one file on a 16-bit channel id. The
//! response arrives as a series of `StreamChunkRes` fragments tagged with the
//! same id: header records first, closed by a zero-length marker, then raw
//! data, then an empty fragment.

use bytes::{BufMut, Bytes};

use crate::error::ProtoError;
use crate::ids::FileId;
use crate::wire::WireReader;

/// Header record carrying the total content size in 4-byte words.
pub const HEADER_SIZE_ID: u8 = 0x03;
/// Channel ranges are expressed in 4-byte words.
pub const WORD_SIZE: u64 = 4;

const REQUEST_MAGIC_A: u32 = 0x0000_4e20;
const REQUEST_MAGIC_B: u32 = 0x0003_0d40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    pub channel: u16,
    pub file_id: FileId,
    pub start_word: u32,
    pub end_word: u32,
}

impl ChannelRequest {
    /// Request the byte range `[start, end)`. Both ends must be word aligned
    /// except the end of the last chunk, which is rounded up.
    pub fn for_bytes(channel: u16, file_id: FileId, start: u64, end: u64) -> Result<Self, ProtoError> {
        let to_word = |byte: u64| {
            u32::try_from(byte.div_ceil(WORD_SIZE))
                .map_err(|_| ProtoError::Framing(format!("byte offset {byte} outside channel range")))
        };
        Ok(Self {
            channel,
            file_id,
            start_word: to_word(start)?,
            end_word: to_word(end)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(46);
        out.put_u16(self.channel);
        out.put_u16(0);
        out.put_u32(0);
        out.put_u32(0);
        out.put_u32(REQUEST_MAGIC_A);
        out.put_u32(REQUEST_MAGIC_B);
        out.put_slice(&self.file_id.0);
        out.put_u32(self.start_word);
        out.put_u32(self.end_word);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(payload);
        let channel = r.u16()?;
        r.bytes(2 + 4 + 4 + 4 + 4)?;
        let file_id = FileId(r.array()?);
        Ok(Self {
            channel,
            file_id,
            start_word: r.u32()?,
            end_word: r.u32()?,
        })
    }

    pub fn start_byte(&self) -> u64 {
        self.start_word as u64 * WORD_SIZE
    }

    pub fn end_byte(&self) -> u64 {
        self.end_word as u64 * WORD_SIZE
    }
}

/// Split a response fragment into its channel id and the remaining bytes.
pub fn split_channel(payload: &Bytes) -> Result<(u16, Bytes), ProtoError> {
    let mut r = WireReader::new(payload);
    let channel = r.u16()?;
    Ok((channel, payload.slice(2..)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    pub id: u8,
    pub data: Bytes,
}

/// Outcome of parsing a fragment while the channel is still in its header
/// section.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct HeaderSection {
    pub records: Vec<HeaderRecord>,
    /// The zero-length marker was seen.
    pub finished: bool,
    /// Bytes following the marker in the same fragment.
    pub trailing: Bytes,
}

/// Parse `(u16 len, u8 id, data[len-1])` records until the zero-length marker
/// or the end of the fragment.
pub fn parse_headers(body: &Bytes) -> Result<HeaderSection, ProtoError> {
    let mut section = HeaderSection::default();
    let mut pos = 0usize;
    while pos < body.len() {
        let mut r = WireReader::new(&body[pos..]);
        let len = r.u16()? as usize;
        pos += 2;
        if len == 0 {
            section.finished = true;
            section.trailing = body.slice(pos..);
            return Ok(section);
        }
        let id = r.u8()?;
        r.bytes(len - 1)?;
        section.records.push(HeaderRecord {
            id,
            data: body.slice(pos + 1..pos + len),
        });
        pos += len;
    }
    Ok(section)
}

pub fn encode_header(out: &mut Vec<u8>, id: u8, data: &[u8]) -> Result<(), ProtoError> {
    let len = u16::try_from(data.len() + 1).map_err(|_| ProtoError::PayloadTooLarge(data.len()))?;
    out.put_u16(len);
    out.put_u8(id);
    out.put_slice(data);
    Ok(())
}

/// `u16 channel | u16 code`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelFailure {
    pub channel: u16,
    pub code: u16,
}

impl ChannelFailure {
    pub fn decode(payload: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(payload);
        let channel = r.u16()?;
        let code = if r.remaining() >= 2 { r.u16()? } else { 0 };
        Ok(Self { channel, code })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4);
        out.put_u16(self.channel);
        out.put_u16(self.code);
        out
    }
}
