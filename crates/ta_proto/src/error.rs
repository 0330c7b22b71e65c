use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Truncated message: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Invalid frame: {0}")]
    Framing(String),

    #[error("Payload of {0} bytes does not fit in one frame")]
    PayloadTooLarge(usize),

    #[error("Unexpected message tag 0x{0:02x}")]
    UnexpectedTag(u8),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("Crypto error: {0}")]
    Crypto(#[from] ta_crypto::CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
