use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Control journal corrupt: {0}")]
    Journal(String),

    #[error("Chunk {index} not cached")]
    MissingChunk { index: u32 },

    #[error("Cached chunk {index} is short: expected {expected} bytes, found {actual}")]
    ShortChunk { index: u32, expected: usize, actual: usize },

    #[error("Caching disabled for this file")]
    Disabled,
}

impl From<ta_proto::ProtoError> for CacheError {
    fn from(err: ta_proto::ProtoError) -> Self {
        Self::Journal(err.to_string())
    }
}
