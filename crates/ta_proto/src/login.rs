//! Application-level login: request (0xAB), welcome (0xAC) and failure (0xAD).

use std::fmt;

use bytes::BufMut;

use crate::error::ProtoError;
use crate::wire::{put_u16_prefixed, WireReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationType {
    UserPass,
    StoredCredentials,
    Token,
    Unknown(u8),
}

impl From<u8> for AuthenticationType {
    fn from(byte: u8) -> Self {
        match byte {
            0x00 => Self::UserPass,
            0x01 => Self::StoredCredentials,
            0x03 => Self::Token,
            other => Self::Unknown(other),
        }
    }
}

impl From<AuthenticationType> for u8 {
    fn from(t: AuthenticationType) -> u8 {
        match t {
            AuthenticationType::UserPass => 0x00,
            AuthenticationType::StoredCredentials => 0x01,
            AuthenticationType::Token => 0x03,
            AuthenticationType::Unknown(byte) => byte,
        }
    }
}

/// Material sent in the login packet. After a successful welcome the session
/// swaps in the reusable credential the server handed back.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub auth_type: AuthenticationType,
    pub auth_data: Vec<u8>,
}

impl Credentials {
    pub fn with_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            auth_type: AuthenticationType::UserPass,
            auth_data: password.into().into_bytes(),
        }
    }

    pub fn stored(username: impl Into<String>, blob: Vec<u8>) -> Self {
        Self {
            username: username.into(),
            auth_type: AuthenticationType::StoredCredentials,
            auth_data: blob,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("auth_type", &self.auth_type)
            .field("auth_data", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub credentials: Credentials,
    pub device_id: String,
    pub client_version: String,
}

impl LoginRequest {
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        let c = &self.credentials;
        let mut out = Vec::with_capacity(16 + c.username.len() + c.auth_data.len());
        out.put_u8(c.auth_type.into());
        put_u16_prefixed(&mut out, c.username.as_bytes())?;
        put_u16_prefixed(&mut out, &c.auth_data)?;
        put_u16_prefixed(&mut out, self.device_id.as_bytes())?;
        put_u16_prefixed(&mut out, self.client_version.as_bytes())?;
        Ok(out)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(payload);
        let auth_type = AuthenticationType::from(r.u8()?);
        let username = r.string("username")?;
        let auth_data = r.u16_prefixed()?.to_vec();
        let device_id = r.string("device id")?;
        let client_version = r.string("client version")?;
        Ok(Self {
            credentials: Credentials {
                username,
                auth_type,
                auth_data,
            },
            device_id,
            client_version,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApWelcome {
    pub canonical_username: String,
    pub reusable_auth_type: AuthenticationType,
    pub reusable_auth_data: Vec<u8>,
}

impl ApWelcome {
    /// Credentials to present on reconnect.
    pub fn reusable_credentials(&self) -> Credentials {
        Credentials {
            username: self.canonical_username.clone(),
            auth_type: self.reusable_auth_type,
            auth_data: self.reusable_auth_data.clone(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        let mut out = Vec::with_capacity(8 + self.reusable_auth_data.len());
        put_u16_prefixed(&mut out, self.canonical_username.as_bytes())?;
        out.put_u8(self.reusable_auth_type.into());
        put_u16_prefixed(&mut out, &self.reusable_auth_data)?;
        Ok(out)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(payload);
        Ok(Self {
            canonical_username: r.string("canonical username")?,
            reusable_auth_type: AuthenticationType::from(r.u8()?),
            reusable_auth_data: r.u16_prefixed()?.to_vec(),
        })
    }
}

/// Structured rejection codes shared by the handshake probe and the login
/// failure packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ProtocolError,
    TryAnotherAp,
    BadConnectionId,
    TravelRestriction,
    PremiumAccountRequired,
    BadCredentials,
    CouldNotValidateCredentials,
    AccountExists,
    ExtraVerificationRequired,
    InvalidAppKey,
    ApplicationBanned,
    Other(u16),
}

impl From<u16> for ErrorCode {
    fn from(code: u16) -> Self {
        match code {
            0 => Self::ProtocolError,
            2 => Self::TryAnotherAp,
            5 => Self::BadConnectionId,
            9 => Self::TravelRestriction,
            11 => Self::PremiumAccountRequired,
            12 => Self::BadCredentials,
            13 => Self::CouldNotValidateCredentials,
            14 => Self::AccountExists,
            15 => Self::ExtraVerificationRequired,
            16 => Self::InvalidAppKey,
            17 => Self::ApplicationBanned,
            other => Self::Other(other),
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        match code {
            ErrorCode::ProtocolError => 0,
            ErrorCode::TryAnotherAp => 2,
            ErrorCode::BadConnectionId => 5,
            ErrorCode::TravelRestriction => 9,
            ErrorCode::PremiumAccountRequired => 11,
            ErrorCode::BadCredentials => 12,
            ErrorCode::CouldNotValidateCredentials => 13,
            ErrorCode::AccountExists => 14,
            ErrorCode::ExtraVerificationRequired => 15,
            ErrorCode::InvalidAppKey => 16,
            ErrorCode::ApplicationBanned => 17,
            ErrorCode::Other(code) => code,
        }
    }
}

impl ErrorCode {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ProtocolError => "protocol error",
            Self::TryAnotherAp => "access point rejected the connection, try another",
            Self::BadConnectionId => "bad connection id",
            Self::TravelRestriction => "account is restricted in this region",
            Self::PremiumAccountRequired => "premium account required",
            Self::BadCredentials => "bad credentials",
            Self::CouldNotValidateCredentials => "could not validate credentials",
            Self::AccountExists => "account already exists",
            Self::ExtraVerificationRequired => "extra verification required",
            Self::InvalidAppKey => "invalid application key",
            Self::ApplicationBanned => "application banned",
            Self::Other(_) => "unknown error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason(), u16::from(*self))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub code: ErrorCode,
    pub description: String,
}

impl AuthFailure {
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        let mut out = Vec::with_capacity(4 + self.description.len());
        out.put_u16(self.code.into());
        put_u16_prefixed(&mut out, self.description.as_bytes())?;
        Ok(out)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtoError> {
        let mut r = WireReader::new(payload);
        let code = ErrorCode::from(r.u16()?);
        // Some servers send the bare code.
        let description = if r.is_empty() {
            String::new()
        } else {
            r.string("failure description")?
        };
        Ok(Self { code, description })
    }
}
