//! Handshake key derivation
//!
//! The 100-byte key block is five HMAC-SHA1 rounds over the handshake
//! transcript, each keyed with the DH shared secret and suffixed with a round
//! counter byte (1..=5):
//!
//! ```text
//!   block = HMAC(ss, transcript || 01) || ... || HMAC(ss, transcript || 05)
//!   challenge = HMAC(block[0x00..0x14], transcript)
//!   send_key  = block[0x14..0x34]
//!   recv_key  = block[0x34..0x54]
//! ```

use hmac::{Hmac, Mac};
use sha1::Sha1;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

type HmacSha1 = Hmac<Sha1>;

pub const KEY_BLOCK_LEN: usize = 0x64;
pub const CHALLENGE_LEN: usize = 20;
pub const CIPHER_KEY_LEN: usize = 32;

/// Output of the handshake KDF. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub challenge: [u8; CHALLENGE_LEN],
    pub send_key: [u8; CIPHER_KEY_LEN],
    pub recv_key: [u8; CIPHER_KEY_LEN],
}

fn mac(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 20], CryptoError> {
    let mut mac =
        HmacSha1::new_from_slice(key).map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Derive the challenge MAC and the two cipher keys from the shared secret and
/// the transcript of every handshake byte sent and received so far.
pub fn compute_keys(shared_secret: &[u8], transcript: &[u8]) -> Result<SessionKeys, CryptoError> {
    let mut block = Vec::with_capacity(KEY_BLOCK_LEN);
    for round in 1u8..=5 {
        block.extend_from_slice(&mac(shared_secret, &[transcript, &[round]])?);
    }

    let challenge = mac(&block[..0x14], &[transcript])?;
    let mut keys = SessionKeys {
        challenge,
        send_key: [0u8; CIPHER_KEY_LEN],
        recv_key: [0u8; CIPHER_KEY_LEN],
    };
    keys.send_key.copy_from_slice(&block[0x14..0x34]);
    keys.recv_key.copy_from_slice(&block[0x34..0x54]);
    block.zeroize();
    Ok(keys)
}
