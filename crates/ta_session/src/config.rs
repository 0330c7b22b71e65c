use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ta_crypto::signature::ServerVerifier;
use ta_store::CacheConfig;

use crate::error::SessionError;

pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub chunk_size: usize,
    /// Chunks requested ahead of the one being read.
    pub preload_chunks: u32,
    /// Network re-requests after a channel error before waiters fail.
    pub max_chunk_retries: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            preload_chunks: 3,
            max_chunk_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub device_id: String,
    pub client_version: String,
    /// Used when the resolver has nothing to offer.
    pub fallback_access_point: String,
    pub handshake_probe_ms: u64,
    pub reconnect_backoff_ms: u64,
    /// `None` retries until the session is closed.
    pub max_reconnect_attempts: Option<u32>,
    /// Hex Ed25519 key overriding the embedded access-point key.
    pub server_public_key: Option<String>,
    pub audio_key_timeout_ms: u64,
    pub stream: StreamConfig,
    pub cache: CacheConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_id: "tonearm-device".into(),
            client_version: concat!("tonearm-", env!("CARGO_PKG_VERSION")).into(),
            fallback_access_point: "ap.tonearm.invalid:4070".into(),
            handshake_probe_ms: 300,
            reconnect_backoff_ms: 10_000,
            max_reconnect_attempts: None,
            server_public_key: None,
            audio_key_timeout_ms: 20_000,
            stream: StreamConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| SessionError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.stream.chunk_size == 0 {
            return Err(SessionError::Config("stream.chunk_size must be non-zero".into()));
        }
        if self.stream.chunk_size % 4 != 0 {
            return Err(SessionError::Config(
                "stream.chunk_size must be a multiple of 4 (channel ranges are in words)".into(),
            ));
        }
        Ok(())
    }

    pub fn server_verifier(&self) -> Result<ServerVerifier, SessionError> {
        let verifier = match &self.server_public_key {
            Some(hex_key) => ServerVerifier::from_hex(hex_key)?,
            None => ServerVerifier::embedded()?,
        };
        Ok(verifier)
    }

    pub fn handshake_probe(&self) -> Duration {
        Duration::from_millis(self.handshake_probe_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn audio_key_timeout(&self) -> Duration {
        Duration::from_millis(self.audio_key_timeout_ms)
    }
}
