//! AES-128-CTR decryption of content chunks.
//!
//! The counter for byte offset `o` within the content is `AUDIO_IV + o / 16`.
//! Chunks are processed in 4096-byte sub-blocks, each re-keyed at its own
//! counter, so any chunk can be decrypted independently of the others.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

pub const AUDIO_KEY_LEN: usize = 16;
pub const SUB_BLOCK_SIZE: usize = 4096;

const AUDIO_IV: u128 = 0x72e0_67fb_ddcb_cf77_ebe8_bc64_3f63_0d93;

/// Per-content symmetric key obtained from the audio-key subsystem.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AudioKey(pub [u8; AUDIO_KEY_LEN]);

impl std::fmt::Debug for AudioKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AudioKey(..)")
    }
}

impl AudioKey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; AUDIO_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("Expected 16-byte audio key".into()))?;
        Ok(Self(key))
    }
}

#[derive(Clone)]
pub struct AudioDecrypt {
    key: AudioKey,
    chunk_size: usize,
}

impl AudioDecrypt {
    pub fn new(key: AudioKey, chunk_size: usize) -> Self {
        Self { key, chunk_size }
    }

    /// Decrypt chunk `index` in place. CTR is symmetric, so this also encrypts.
    pub fn decrypt_chunk(&self, index: u32, buf: &mut [u8]) -> Result<(), CryptoError> {
        let base = index as u128 * self.chunk_size as u128;
        for (n, block) in buf.chunks_mut(SUB_BLOCK_SIZE).enumerate() {
            let offset = base + (n * SUB_BLOCK_SIZE) as u128;
            let iv = AUDIO_IV.wrapping_add(offset / 16).to_be_bytes();
            let mut cipher = Aes128Ctr::new_from_slices(&self.key.0, &iv)
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            cipher.apply_keystream(block);
        }
        Ok(())
    }
}
