//! Pre-cipher handshake messages.
//!
//! The client's first message carries a version prefix:
//!   [ u8 major | u8 minor | u32 total_len | payload ]
//! Every later handshake message is:
//!   [ u32 total_len | payload ]
//! `total_len` includes its own prefix. All bytes on the wire, prefixes
//! included, form the transcript fed to the key derivation.

use bytes::BufMut;

use crate::error::ProtoError;
use crate::wire::{put_u16_prefixed, WireReader};

pub const PROTOCOL_MAJOR: u8 = 0;
pub const PROTOCOL_MINOR: u8 = 4;
pub const CLIENT_HELLO_PREFIX: usize = 6;
pub const MESSAGE_PREFIX: usize = 4;
pub const MAX_MESSAGE_LEN: usize = 16 * 1024;

pub const CIPHER_SUITE_SHANNON: u8 = 0x01;

const TAG_HELLO: u8 = 0x01;
const TAG_CHALLENGE: u8 = 0x01;
const TAG_LOGIN_FAILED: u8 = 0x02;
const TAG_CHALLENGE_RESPONSE: u8 = 0x01;

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MESSAGE_PREFIX + payload.len());
    out.put_u32((MESSAGE_PREFIX + payload.len()) as u32);
    out.put_slice(payload);
    out
}

/// Validate a `u32 total_len` prefix and return the payload length.
pub fn payload_len(total_len: u32, prefix: usize) -> Result<usize, ProtoError> {
    let total = total_len as usize;
    if total < prefix || total > MAX_MESSAGE_LEN {
        return Err(ProtoError::Framing(format!(
            "handshake message length {total} out of range"
        )));
    }
    Ok(total - prefix)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub public_key: [u8; 32],
    pub cipher_suites: Vec<u8>,
    pub client_nonce: [u8; 16],
    pub client_version: String,
}

impl ClientHello {
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        let mut payload = Vec::with_capacity(96);
        payload.put_u8(TAG_HELLO);
        payload.put_slice(&self.public_key);
        let suites =
            u8::try_from(self.cipher_suites.len()).map_err(|_| ProtoError::PayloadTooLarge(self.cipher_suites.len()))?;
        payload.put_u8(suites);
        payload.put_slice(&self.cipher_suites);
        payload.put_slice(&self.client_nonce);
        put_u16_prefixed(&mut payload, self.client_version.as_bytes())?;

        let mut out = Vec::with_capacity(CLIENT_HELLO_PREFIX + payload.len());
        out.put_u8(PROTOCOL_MAJOR);
        out.put_u8(PROTOCOL_MINOR);
        out.put_u32((CLIENT_HELLO_PREFIX + payload.len()) as u32);
        out.put_slice(&payload);
        Ok(out)
    }

    pub fn decode_payload(payload: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(payload);
        let tag = r.u8()?;
        if tag != TAG_HELLO {
            return Err(ProtoError::UnexpectedTag(tag));
        }
        let public_key = r.array()?;
        let suites = r.u8()? as usize;
        let cipher_suites = r.bytes(suites)?.to_vec();
        let client_nonce = r.array()?;
        let client_version = r.string("client version")?;
        Ok(Self {
            public_key,
            cipher_suites,
            client_nonce,
            client_version,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerChallenge {
    pub server_public: [u8; 32],
    pub signature: [u8; 64],
    pub server_nonce: [u8; 16],
}

/// Server's answer to the hello, and the optional failure probe after the
/// challenge response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApResponse {
    Challenge(ServerChallenge),
    LoginFailed { code: u16 },
}

impl ApResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(113);
        match self {
            Self::Challenge(c) => {
                payload.put_u8(TAG_CHALLENGE);
                payload.put_slice(&c.server_public);
                payload.put_slice(&c.signature);
                payload.put_slice(&c.server_nonce);
            }
            Self::LoginFailed { code } => {
                payload.put_u8(TAG_LOGIN_FAILED);
                payload.put_u16(*code);
            }
        }
        frame(&payload)
    }

    pub fn decode_payload(payload: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(payload);
        match r.u8()? {
            TAG_CHALLENGE => Ok(Self::Challenge(ServerChallenge {
                server_public: r.array()?,
                signature: r.array()?,
                server_nonce: r.array()?,
            })),
            TAG_LOGIN_FAILED => Ok(Self::LoginFailed { code: r.u16()? }),
            other => Err(ProtoError::UnexpectedTag(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    pub challenge: [u8; 20],
}

impl ChallengeResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(21);
        payload.put_u8(TAG_CHALLENGE_RESPONSE);
        payload.put_slice(&self.challenge);
        frame(&payload)
    }

    pub fn decode_payload(payload: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(payload);
        let tag = r.u8()?;
        if tag != TAG_CHALLENGE_RESPONSE {
            return Err(ProtoError::UnexpectedTag(tag));
        }
        Ok(Self {
            challenge: r.array()?,
        })
    }
}
