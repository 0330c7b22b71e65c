//! Scripted access point for integration tests.
//!
//! Speaks the real handshake and packet cipher on 127.0.0.1, serves files
//! from memory and counts what it sees.

#![allow(dead_code)]

pub mod memory;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BufMut;
use ed25519_dalek::{Signer, SigningKey};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::RngCore;
use ta_crypto::{compute_keys, AudioDecrypt, AudioKey, DhLocalKeys};
use ta_proto::audio_key::{AudioKeyRequest, AudioKeyResponse};
use ta_proto::channel::{encode_header, ChannelFailure, ChannelRequest, HEADER_SIZE_ID};
use ta_proto::handshake::{
    payload_len, ApResponse, ChallengeResponse, ClientHello, ServerChallenge, CLIENT_HELLO_PREFIX,
    MESSAGE_PREFIX,
};
use ta_proto::login::{ApWelcome, AuthFailure, AuthenticationType, ErrorCode, LoginRequest};
use ta_proto::{ApDecoder, ApEncoder, FileId, ItemGid, Packet, PacketType};
use ta_session::{SessionConfig, StaticAccessPoints};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

pub const PASSWORD: &str = "hunter2";
pub const STORED_BLOB: &[u8] = b"reusable-blob";
const FRAGMENT_SIZE: usize = 1000;

pub struct ServedFile {
    pub gid: ItemGid,
    pub key: [u8; 16],
    pub plain: Vec<u8>,
    encrypted: Vec<u8>,
}

impl ServedFile {
    /// `plain` must be a whole number of words.
    pub fn new(gid: ItemGid, key: [u8; 16], plain: Vec<u8>, chunk_size: usize) -> Self {
        assert_eq!(plain.len() % 4, 0);
        let decrypt = AudioDecrypt::new(AudioKey(key), chunk_size);
        let mut encrypted = plain.clone();
        for (index, chunk) in encrypted.chunks_mut(chunk_size).enumerate() {
            decrypt.decrypt_chunk(index as u32, chunk).unwrap();
        }
        Self {
            gid,
            key,
            plain,
            encrypted,
        }
    }
}

#[derive(Default)]
pub struct Script {
    /// Sign the DH key with a key the client does not trust.
    pub wrong_signature: bool,
    /// Reject after the challenge response with this code.
    pub reject_handshake: Option<u16>,
    /// Answer the login with an auth failure.
    pub login_failure: Option<ErrorCode>,
    /// Send a frame with a broken MAC on the first connection.
    pub corrupt_first_connection: bool,
    /// Wait this long before answering the hello of every later connection.
    pub reconnect_delay: Option<Duration>,
    /// Leave chunk requests starting at or past this byte unanswered.
    pub withhold_from: Option<u64>,
    pub files: HashMap<FileId, ServedFile>,
}

#[derive(Default)]
pub struct Counters {
    pub connections: AtomicUsize,
    pub chunk_requests: AtomicUsize,
    pub key_requests: AtomicUsize,
    pub pongs: AtomicUsize,
    pub logins: Mutex<Vec<AuthenticationType>>,
}

pub struct FakeAp {
    pub addr: String,
    pub verifying_key: [u8; 32],
    pub counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl Drop for FakeAp {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FakeAp {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let signing = SigningKey::generate(&mut rand::rngs::OsRng);
        let verifying_key = signing.verifying_key().to_bytes();
        let counters = Arc::new(Counters::default());
        let script = Arc::new(script);

        let task = {
            let counters = counters.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        return;
                    };
                    let n = counters.connections.fetch_add(1, Ordering::SeqCst) + 1;
                    let (script, counters, signing) =
                        (script.clone(), counters.clone(), signing.clone());
                    tokio::spawn(async move {
                        let _ = serve(socket, n, &script, &counters, &signing).await;
                    });
                }
            })
        };

        Self {
            addr,
            verifying_key,
            counters,
            task,
        }
    }

    pub fn source(&self) -> Arc<StaticAccessPoints> {
        Arc::new(StaticAccessPoints(vec![self.addr.clone()]))
    }

    /// Config trusting this server, with short timeouts.
    pub fn config(&self, chunk_size: usize, cache_dir: &std::path::Path) -> SessionConfig {
        let mut config = SessionConfig::default();
        config.server_public_key = Some(hex::encode(self.verifying_key));
        config.handshake_probe_ms = 50;
        config.reconnect_backoff_ms = 50;
        config.max_reconnect_attempts = Some(5);
        config.audio_key_timeout_ms = 2_000;
        config.stream.chunk_size = chunk_size;
        config.cache.directory = cache_dir.to_path_buf();
        config
    }

    pub fn chunk_requests(&self) -> usize {
        self.counters.chunk_requests.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.counters.connections.load(Ordering::SeqCst)
    }
}

type AnyResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

async fn serve(
    mut socket: TcpStream,
    connection: usize,
    script: &Script,
    counters: &Counters,
    signing: &SigningKey,
) -> AnyResult<()> {
    let mut prefix = [0u8; CLIENT_HELLO_PREFIX];
    socket.read_exact(&mut prefix).await?;
    let len = payload_len(u32::from_be_bytes(prefix[2..6].try_into()?), CLIENT_HELLO_PREFIX)?;
    let mut payload = vec![0u8; len];
    socket.read_exact(&mut payload).await?;
    let hello = ClientHello::decode_payload(&payload)?;
    let mut transcript = prefix.to_vec();
    transcript.extend_from_slice(&payload);

    if connection > 1 {
        if let Some(delay) = script.reconnect_delay {
            tokio::time::sleep(delay).await;
        }
    }

    let local = DhLocalKeys::random();
    let signer = if script.wrong_signature {
        SigningKey::generate(&mut rand::rngs::OsRng)
    } else {
        signing.clone()
    };
    let mut server_nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut server_nonce);
    let challenge = ApResponse::Challenge(ServerChallenge {
        server_public: local.public_key(),
        signature: signer.sign(&local.public_key()).to_bytes(),
        server_nonce,
    })
    .encode();
    socket.write_all(&challenge).await?;
    transcript.extend_from_slice(&challenge);

    let shared = local.shared_secret(&hello.public_key)?;
    let keys = compute_keys(&shared[..], &transcript)?;

    let mut prefix = [0u8; MESSAGE_PREFIX];
    socket.read_exact(&mut prefix).await?;
    let len = payload_len(u32::from_be_bytes(prefix), MESSAGE_PREFIX)?;
    let mut payload = vec![0u8; len];
    socket.read_exact(&mut payload).await?;
    let response = ChallengeResponse::decode_payload(&payload)?;

    let rejection = if response.challenge != keys.challenge {
        Some(0)
    } else {
        script.reject_handshake
    };
    if let Some(code) = rejection {
        socket
            .write_all(&ApResponse::LoginFailed { code }.encode())
            .await?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        return Ok(());
    }

    let (read_half, write_half) = socket.into_split();
    let mut reader = FramedRead::new(read_half, ApDecoder::new(&keys.send_key));
    let mut writer = FramedWrite::new(write_half, ApEncoder::new(&keys.recv_key));

    let Some(packet) = reader.next().await else {
        return Ok(());
    };
    let packet = packet?;
    let login = LoginRequest::decode(&packet.payload)?;
    counters.logins.lock().push(login.credentials.auth_type);

    if let Some(code) = script.login_failure {
        let failure = AuthFailure {
            code,
            description: "rejected by test script".into(),
        };
        writer
            .send(Packet::new(PacketType::AuthFailure, failure.encode()?))
            .await?;
        return Ok(());
    }

    let welcome = ApWelcome {
        canonical_username: login.credentials.username.clone(),
        reusable_auth_type: AuthenticationType::StoredCredentials,
        reusable_auth_data: STORED_BLOB.to_vec(),
    };
    writer
        .send(Packet::new(PacketType::ApWelcome, welcome.encode()?))
        .await?;
    writer
        .send(Packet::new(PacketType::CountryCode, b"SE".to_vec()))
        .await?;
    writer
        .send(Packet::new(PacketType::Ping, vec![0, 0, 0, 42]))
        .await?;

    if script.corrupt_first_connection && connection == 1 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        writer
            .get_mut()
            .write_all(&[0x00, 0x05, 1, 2, 3, 4, 5, 0xde, 0xad, 0xbe, 0xef])
            .await?;
        tokio::time::sleep(Duration::from_millis(500)).await;
        return Ok(());
    }

    while let Some(packet) = reader.next().await {
        let packet = packet?;
        match packet.cmd {
            PacketType::StreamChunk => {
                counters.chunk_requests.fetch_add(1, Ordering::SeqCst);
                let request = ChannelRequest::decode(&packet.payload)?;
                serve_chunk(&mut writer, script, &request).await?;
            }
            PacketType::RequestKey => {
                counters.key_requests.fetch_add(1, Ordering::SeqCst);
                let request = AudioKeyRequest::decode(&packet.payload)?;
                let reply = match script.files.get(&request.file_id) {
                    Some(file) if file.gid == request.gid => Packet::new(
                        PacketType::AesKey,
                        AudioKeyResponse::Key {
                            seq: request.seq,
                            key: file.key,
                        }
                        .encode(),
                    ),
                    _ => Packet::new(
                        PacketType::AesKeyError,
                        AudioKeyResponse::Error {
                            seq: request.seq,
                            code: 1,
                        }
                        .encode(),
                    ),
                };
                writer.send(reply).await?;
            }
            PacketType::Pong => {
                counters.pongs.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
    Ok(())
}

async fn serve_chunk<W>(
    writer: &mut FramedWrite<W, ApEncoder>,
    script: &Script,
    request: &ChannelRequest,
) -> AnyResult<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let channel = request.channel;
    let Some(file) = script.files.get(&request.file_id) else {
        let failure = ChannelFailure { channel, code: 1 }.encode();
        writer.send(Packet::new(PacketType::ChannelError, failure)).await?;
        return Ok(());
    };

    if script.withhold_from.is_some_and(|from| request.start_byte() >= from) {
        return Ok(());
    }

    let fragment = |body: &[u8]| {
        let mut payload = Vec::with_capacity(2 + body.len());
        payload.put_u16(channel);
        payload.extend_from_slice(body);
        Packet::new(PacketType::StreamChunkRes, payload)
    };

    let words = (file.encrypted.len() / 4) as u32;
    let mut headers = Vec::new();
    encode_header(&mut headers, HEADER_SIZE_ID, &words.to_be_bytes())?;
    headers.put_u16(0);
    writer.send(fragment(&headers)).await?;

    let len = file.encrypted.len() as u64;
    let start = request.start_byte().min(len) as usize;
    let end = request.end_byte().min(len) as usize;
    for part in file.encrypted[start..end].chunks(FRAGMENT_SIZE) {
        writer.send(fragment(part)).await?;
    }
    writer.send(fragment(&[])).await?;
    Ok(())
}

pub fn sample_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(seed as u32) as u8)
        .collect()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn wait_for(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
