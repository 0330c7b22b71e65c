use ta_proto::login::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Peer signature did not verify or a handshake message was malformed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Structured rejection from the access point. Not retried.
    #[error("Authentication failed: {code}")]
    Authentication { code: ErrorCode, description: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Proto(#[from] ta_proto::ProtoError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] ta_crypto::CryptoError),

    #[error("Cache error: {0}")]
    Cache(#[from] ta_store::CacheError),

    #[error("Channel {channel} failed with code {code:#06x}")]
    Channel { channel: u16, code: u16 },

    #[error("Audio key request failed: {0}")]
    AudioKey(String),

    #[error("Packet handler panicked while handling {0}")]
    HandlerPanicked(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session closed")]
    Closed,

    #[error("Session failed permanently: {0}")]
    Failed(String),
}

impl SessionError {
    /// Human-readable reason for an authentication rejection.
    pub fn auth_reason(&self) -> Option<&'static str> {
        match self {
            Self::Authentication { code, .. } => Some(code.reason()),
            _ => None,
        }
    }
}
