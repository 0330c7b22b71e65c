//! Verification of the access point's signature over its DH public key.

use ed25519_dalek::{Signature, VerifyingKey};

use crate::error::CryptoError;

pub const SIGNATURE_LEN: usize = 64;

/// Verifying key of the production access points.
pub const SERVER_VERIFYING_KEY: [u8; 32] = [
    0xd7, 0x5a, 0x98, 0x01, 0x82, 0xb1, 0x0a, 0xb7, 0xd5, 0x4b, 0xfe, 0xd3, 0xc9, 0x64, 0x07, 0x3a,
    0x0e, 0xe1, 0x72, 0xf3, 0xda, 0xa6, 0x23, 0x25, 0xaf, 0x02, 0x1a, 0x68, 0xf7, 0x07, 0x51, 0x1a,
];

#[derive(Clone, Debug)]
pub struct ServerVerifier {
    key: VerifyingKey,
}

impl ServerVerifier {
    pub fn embedded() -> Result<Self, CryptoError> {
        Self::from_bytes(&SERVER_VERIFYING_KEY)
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let raw = hex::decode(s)?;
        let bytes: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("Expected 32-byte Ed25519 key".into()))?;
        Self::from_bytes(&bytes)
    }

    /// Check `signature` over the server's DH public key.
    pub fn verify(&self, server_public: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let sig: [u8; SIGNATURE_LEN] = signature
            .try_into()
            .map_err(|_| CryptoError::SignatureVerification)?;
        self.key
            .verify_strict(server_public, &Signature::from_bytes(&sig))
            .map_err(|_| CryptoError::SignatureVerification)
    }
}
