//! X25519 key agreement used by the access-point handshake.
//!
//! A fresh keypair is generated per connection attempt; reconnects never reuse
//! a previous keypair.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const PUBLIC_KEY_LEN: usize = 32;

/// Local half of the key exchange. The secret is zeroized on drop by
/// `x25519-dalek`.
pub struct DhLocalKeys {
    secret: StaticSecret,
    public: PublicKey,
}

impl DhLocalKeys {
    pub fn random() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a keypair from raw secret bytes (deterministic handshakes in tests).
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        *self.public.as_bytes()
    }

    /// Compute the shared secret with the peer's public key.
    pub fn shared_secret(&self, remote_public: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let remote: [u8; PUBLIC_KEY_LEN] = remote_public
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("Expected 32-byte X25519 key".into()))?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(remote));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKey("Non-contributory peer key".into()));
        }
        Ok(Zeroizing::new(*shared.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree() {
        let a = DhLocalKeys::random();
        let b = DhLocalKeys::random();
        let ab = a.shared_secret(&b.public_key()).unwrap();
        let ba = b.shared_secret(&a.public_key()).unwrap();
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn rejects_short_key() {
        let a = DhLocalKeys::random();
        assert!(a.shared_secret(&[1u8; 16]).is_err());
    }

    #[test]
    fn rejects_low_order_point() {
        let a = DhLocalKeys::random();
        assert!(a.shared_secret(&[0u8; 32]).is_err());
    }
}
