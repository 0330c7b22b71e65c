//! Bounds-checked big-endian reader. `bytes::Buf` panics on short input; every
//! payload here comes off the network, so reads return `ProtoError::Truncated`
//! instead.

use bytes::BufMut;

use crate::error::ProtoError;

pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], ProtoError> {
        if self.buf.len() < n {
            return Err(ProtoError::Truncated {
                needed: n,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtoError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, ProtoError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, ProtoError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, ProtoError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    /// `u16 length | bytes`
    pub fn u16_prefixed(&mut self) -> Result<&'a [u8], ProtoError> {
        let len = self.u16()? as usize;
        self.bytes(len)
    }

    pub fn string(&mut self, field: &'static str) -> Result<String, ProtoError> {
        let raw = self.u16_prefixed()?;
        String::from_utf8(raw.to_vec()).map_err(|_| ProtoError::InvalidUtf8(field))
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }
}

/// Append `u16 length | bytes`. Fields longer than `u16::MAX` are rejected.
pub fn put_u16_prefixed<B: BufMut>(out: &mut B, data: &[u8]) -> Result<(), ProtoError> {
    let len = u16::try_from(data.len()).map_err(|_| ProtoError::PayloadTooLarge(data.len()))?;
    out.put_u16(len);
    out.put_slice(data);
    Ok(())
}
