use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Server signature verification failed")]
    SignatureVerification,

    #[error("Packet MAC mismatch (possible tampering)")]
    MacMismatch,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
