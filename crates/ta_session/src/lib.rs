//! ta_session — Tonearm access-point session and content streaming
//!
//! # Module layout
//! - `config`      — JSON session configuration with serde defaults
//! - `resolver`    — access-point address pool with static fallback
//! - `handshake`   — key exchange, challenge and login over a fresh socket
//! - `connection`  — one authenticated connection + its serialized send side
//! - `session`     — long-lived handle, receive loop, reconnection, routing
//! - `dispatch`    — one ordered worker per subsystem, panic-isolated
//! - `channel`     — multiplexed chunk fetches over 16-bit channel ids
//! - `audio_key`   — per-file key requests correlated by sequence number
//! - `stream`      — blocking, seekable reader over chunked content
//! - `content`     — cache-first chunk loader wiring streams to channels
//! - `error`       — unified error type

pub mod audio_key;
pub mod channel;
pub mod config;
pub mod connection;
pub mod content;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod resolver;
pub mod session;
pub mod stream;

pub use audio_key::{AudioKeyManager, AudioKeyProvider};
pub use channel::{ChannelError, ChannelManager, ChannelSink};
pub use config::{SessionConfig, StreamConfig};
pub use content::{open_audio_stream, open_stream, ContentLoader};
pub use dispatch::PacketHandler;
pub use error::SessionError;
pub use resolver::{AccessPointSource, ApResolver, StaticAccessPoints};
pub use session::{PacketSend, Session, SessionState};
pub use stream::{ChunkBuffer, ChunkLoader, ChunkedStream, StreamCloser};
