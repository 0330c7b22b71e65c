//! Encrypted packet framing.
//!
//! ```text
//!   [ u16 BE length ][ enc(command u8 || payload) ][ MAC 4 bytes ]
//! ```
//! `length` counts command + payload. The encoder and decoder are separate
//! types so the write half and the read half of a connection can each own
//! exactly one direction's cipher.

use bytes::{Buf, BufMut, BytesMut};
use ta_crypto::{PacketCipher, MAC_SIZE};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtoError;
use crate::packet::{Packet, PacketType};

const LENGTH_SIZE: usize = 2;

pub struct ApEncoder {
    cipher: PacketCipher,
}

impl ApEncoder {
    pub fn new(send_key: &[u8; 32]) -> Self {
        Self {
            cipher: PacketCipher::new(send_key),
        }
    }
}

impl Encoder<Packet> for ApEncoder {
    type Error = ProtoError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = 1 + item.payload.len();
        let wire_len = u16::try_from(len).map_err(|_| ProtoError::PayloadTooLarge(len))?;

        dst.reserve(LENGTH_SIZE + len + MAC_SIZE);
        dst.put_u16(wire_len);
        let offset = dst.len();
        dst.put_u8(item.cmd.into());
        dst.extend_from_slice(&item.payload);

        let mac = self.cipher.seal(&mut dst[offset..]);
        dst.extend_from_slice(&mac);
        Ok(())
    }
}

pub struct ApDecoder {
    cipher: PacketCipher,
}

impl ApDecoder {
    pub fn new(recv_key: &[u8; 32]) -> Self {
        Self {
            cipher: PacketCipher::new(recv_key),
        }
    }
}

impl Decoder for ApDecoder {
    type Item = Packet;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, Self::Error> {
        if src.len() < LENGTH_SIZE {
            return Ok(None);
        }
        let len = u16::from_be_bytes([src[0], src[1]]) as usize;
        if len == 0 {
            return Err(ProtoError::Framing("zero-length frame".into()));
        }

        let total = LENGTH_SIZE + len + MAC_SIZE;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_SIZE);
        let mut body = src.split_to(len);
        let mac = src.split_to(MAC_SIZE);
        self.cipher.open(&mut body, &mac)?;

        let cmd = PacketType::from(body[0]);
        body.advance(1);
        Ok(Some(Packet {
            cmd,
            payload: body.freeze(),
        }))
    }
}
