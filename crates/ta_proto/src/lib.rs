//! ta_proto — Tonearm access-point protocol types and serialisation
//!
//! Everything here is pure encode/decode; no sockets, no tasks.
//!
//! # Module layout
//! - `ids`        — content (file) ids and item gids
//! - `packet`     — closed enum over the packet command bytes
//! - `codec`      — encrypted packet framing (tokio-util `Encoder` / `Decoder`)
//! - `handshake`  — pre-cipher key-exchange messages
//! - `login`      — login request, welcome and failure payloads
//! - `channel`    — chunk request payload and response-fragment parsing
//! - `audio_key`  — audio-key request / response payloads
//! - `wire`       — checked big-endian reader shared by the above
//! - `error`      — unified error type

pub mod audio_key;
pub mod channel;
pub mod codec;
pub mod error;
pub mod handshake;
pub mod ids;
pub mod login;
pub mod packet;
pub mod wire;

pub use codec::{ApDecoder, ApEncoder};
pub use error::ProtoError;
pub use ids::{FileId, ItemGid};
pub use packet::{Packet, PacketType};
