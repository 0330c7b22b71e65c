//! ta_crypto — Tonearm access-point cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Stateful ciphers are owned values; nonce counters never leave this crate.
//!
//! # Module layout
//! - `dh`         — X25519 key agreement for the access-point handshake
//! - `kdf`        — HMAC-SHA1 key-block derivation + challenge MAC
//! - `signature`  — Ed25519 verification of the server's DH public key
//! - `cipher`     — per-direction packet stream cipher with 4-byte MAC
//! - `audio`      — AES-128-CTR content chunk decryption
//! - `error`      — unified error type

pub mod audio;
pub mod cipher;
pub mod dh;
pub mod error;
pub mod kdf;
pub mod signature;

pub use audio::{AudioDecrypt, AudioKey};
pub use cipher::{PacketCipher, MAC_SIZE};
pub use dh::DhLocalKeys;
pub use error::CryptoError;
pub use kdf::{compute_keys, SessionKeys};
