//! Packet command bytes.
//!
//! The set is closed: anything not listed decodes as `Unknown(byte)` and is
//! skipped by the receive loop.

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    SecretBlock,
    Ping,
    StreamChunk,
    StreamChunkRes,
    ChannelError,
    ChannelAbort,
    RequestKey,
    AesKey,
    AesKeyError,
    Image,
    CountryCode,
    Pong,
    PongAck,
    Pause,
    ProductInfo,
    LegacyWelcome,
    LicenseVersion,
    Login,
    ApWelcome,
    AuthFailure,
    MercuryReq,
    MercurySub,
    MercuryUnsub,
    MercuryEvent,
    TrackEndedTime,
    UnknownDataAllZeros,
    PreferredLocale,
    Unknown(u8),
}

impl From<u8> for PacketType {
    fn from(byte: u8) -> Self {
        match byte {
            0x02 => Self::SecretBlock,
            0x04 => Self::Ping,
            0x08 => Self::StreamChunk,
            0x09 => Self::StreamChunkRes,
            0x0a => Self::ChannelError,
            0x0b => Self::ChannelAbort,
            0x0c => Self::RequestKey,
            0x0d => Self::AesKey,
            0x0e => Self::AesKeyError,
            0x19 => Self::Image,
            0x1b => Self::CountryCode,
            0x1f => Self::UnknownDataAllZeros,
            0x49 => Self::Pong,
            0x4a => Self::PongAck,
            0x4b => Self::Pause,
            0x50 => Self::ProductInfo,
            0x69 => Self::LegacyWelcome,
            0x74 => Self::PreferredLocale,
            0x76 => Self::LicenseVersion,
            0x82 => Self::TrackEndedTime,
            0xab => Self::Login,
            0xac => Self::ApWelcome,
            0xad => Self::AuthFailure,
            0xb2 => Self::MercuryReq,
            0xb3 => Self::MercurySub,
            0xb4 => Self::MercuryUnsub,
            0xb5 => Self::MercuryEvent,
            other => Self::Unknown(other),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(cmd: PacketType) -> u8 {
        match cmd {
            PacketType::SecretBlock => 0x02,
            PacketType::Ping => 0x04,
            PacketType::StreamChunk => 0x08,
            PacketType::StreamChunkRes => 0x09,
            PacketType::ChannelError => 0x0a,
            PacketType::ChannelAbort => 0x0b,
            PacketType::RequestKey => 0x0c,
            PacketType::AesKey => 0x0d,
            PacketType::AesKeyError => 0x0e,
            PacketType::Image => 0x19,
            PacketType::CountryCode => 0x1b,
            PacketType::UnknownDataAllZeros => 0x1f,
            PacketType::Pong => 0x49,
            PacketType::PongAck => 0x4a,
            PacketType::Pause => 0x4b,
            PacketType::ProductInfo => 0x50,
            PacketType::LegacyWelcome => 0x69,
            PacketType::PreferredLocale => 0x74,
            PacketType::LicenseVersion => 0x76,
            PacketType::TrackEndedTime => 0x82,
            PacketType::Login => 0xab,
            PacketType::ApWelcome => 0xac,
            PacketType::AuthFailure => 0xad,
            PacketType::MercuryReq => 0xb2,
            PacketType::MercurySub => 0xb3,
            PacketType::MercuryUnsub => 0xb4,
            PacketType::MercuryEvent => 0xb5,
            PacketType::Unknown(byte) => byte,
        }
    }
}

/// One decoded application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub cmd: PacketType,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(cmd: PacketType, payload: impl Into<Bytes>) -> Self {
        Self {
            cmd,
            payload: payload.into(),
        }
    }
}
