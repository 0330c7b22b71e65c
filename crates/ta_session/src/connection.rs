//! One authenticated TCP connection to an access point.
//!
//! The read half goes to the session's receive loop; the write half sits
//! behind [`Transport`], the single place packets are encrypted and written.

use futures_util::SinkExt;
use ta_crypto::signature::ServerVerifier;
use ta_proto::login::{ApWelcome, Credentials, LoginRequest};
use ta_proto::{ApDecoder, ApEncoder, Packet};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::info;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::handshake::{authenticate, handshake};

pub type PacketReader = FramedRead<OwnedReadHalf, ApDecoder>;
pub type PacketWriter = FramedWrite<OwnedWriteHalf, ApEncoder>;

pub struct Connection {
    pub addr: String,
    pub reader: PacketReader,
    pub writer: PacketWriter,
    pub welcome: ApWelcome,
}

/// Connect, run the key exchange and log in.
pub async fn connect(
    addr: &str,
    config: &SessionConfig,
    verifier: &ServerVerifier,
    credentials: &Credentials,
) -> Result<Connection, SessionError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;

    let (stream, encoder, decoder) =
        handshake(stream, verifier, &config.client_version, config.handshake_probe()).await?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, decoder);
    let mut writer = FramedWrite::new(write_half, encoder);

    let request = LoginRequest {
        credentials: credentials.clone(),
        device_id: config.device_id.clone(),
        client_version: config.client_version.clone(),
    };
    let welcome = authenticate(&mut reader, &mut writer, &request).await?;
    info!(ap = %addr, user = %welcome.canonical_username, "authenticated");

    Ok(Connection {
        addr: addr.to_string(),
        reader,
        writer,
        welcome,
    })
}

/// Send side of a live connection. The send cipher's nonce advances once per
/// packet, so writes are serialized through the mutex.
pub struct Transport {
    writer: Mutex<PacketWriter>,
    generation: u64,
}

impl Transport {
    pub fn new(writer: PacketWriter, generation: u64) -> Self {
        Self {
            writer: Mutex::new(writer),
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn encrypt_and_send(&self, packet: Packet) -> Result<(), SessionError> {
        let mut writer = self.writer.lock().await;
        writer
            .send(packet)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }
}
