//! Client side of the key exchange and login.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::RngCore;
use ta_crypto::signature::ServerVerifier;
use ta_crypto::{compute_keys, DhLocalKeys};
use ta_proto::handshake::{
    payload_len, ApResponse, ChallengeResponse, ClientHello, CIPHER_SUITE_SHANNON, MESSAGE_PREFIX,
};
use ta_proto::login::{ApWelcome, AuthFailure, ErrorCode, LoginRequest};
use ta_proto::{ApDecoder, ApEncoder, Packet, PacketType};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

use crate::error::SessionError;

/// Run the key exchange over `stream` and return it with the cipher pair for
/// each direction. Every byte sent and received up to the challenge response
/// feeds the key derivation.
pub async fn handshake<S>(
    mut stream: S,
    verifier: &ServerVerifier,
    client_version: &str,
    probe: Duration,
) -> Result<(S, ApEncoder, ApDecoder), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let local = DhLocalKeys::random();
    let mut client_nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut client_nonce);

    let hello = ClientHello {
        public_key: local.public_key(),
        cipher_suites: vec![CIPHER_SUITE_SHANNON],
        client_nonce,
        client_version: client_version.to_string(),
    }
    .encode()?;
    stream.write_all(&hello).await?;
    stream.flush().await?;
    let mut transcript = hello;

    let payload = read_message(&mut stream, &mut transcript).await?;
    let challenge = match ApResponse::decode_payload(&payload)
        .map_err(|e| SessionError::Handshake(format!("malformed server response: {e}")))?
    {
        ApResponse::Challenge(challenge) => challenge,
        ApResponse::LoginFailed { code } => return Err(rejected(code)),
    };

    verifier
        .verify(&challenge.server_public, &challenge.signature)
        .map_err(|_| SessionError::Handshake("server signature verification failed".into()))?;

    let shared = local.shared_secret(&challenge.server_public)?;
    let keys = compute_keys(&shared[..], &transcript)?;

    let response = ChallengeResponse {
        challenge: keys.challenge,
    }
    .encode();
    stream.write_all(&response).await?;
    stream.flush().await?;

    // The access point only speaks up here to reject; silence means accepted.
    match tokio::time::timeout(probe, read_message(&mut stream, &mut Vec::new())).await {
        Err(_) => {}
        Ok(Ok(payload)) => {
            return match ApResponse::decode_payload(&payload)? {
                ApResponse::LoginFailed { code } => Err(rejected(code)),
                ApResponse::Challenge(_) => {
                    Err(SessionError::Handshake("unexpected second challenge".into()))
                }
            };
        }
        Ok(Err(err)) => return Err(err),
    }

    debug!("handshake complete");
    Ok((
        stream,
        ApEncoder::new(&keys.send_key),
        ApDecoder::new(&keys.recv_key),
    ))
}

/// Send the login packet and wait for the welcome or the failure.
pub async fn authenticate<R, W>(
    reader: &mut FramedRead<R, ApDecoder>,
    writer: &mut FramedWrite<W, ApEncoder>,
    request: &LoginRequest,
) -> Result<ApWelcome, SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer
        .send(Packet::new(PacketType::Login, request.encode()?))
        .await?;

    let packet = reader
        .next()
        .await
        .ok_or_else(|| SessionError::Transport("connection closed during login".into()))??;

    match packet.cmd {
        PacketType::ApWelcome => Ok(ApWelcome::decode(&packet.payload)?),
        PacketType::AuthFailure => {
            let failure = AuthFailure::decode(&packet.payload)?;
            Err(SessionError::Authentication {
                code: failure.code,
                description: failure.description,
            })
        }
        other => Err(SessionError::Handshake(format!(
            "unexpected {other:?} packet during login"
        ))),
    }
}

async fn read_message<S>(stream: &mut S, transcript: &mut Vec<u8>) -> Result<Vec<u8>, SessionError>
where
    S: AsyncRead + Unpin,
{
    let mut prefix = [0u8; MESSAGE_PREFIX];
    stream.read_exact(&mut prefix).await?;
    let len = payload_len(u32::from_be_bytes(prefix), MESSAGE_PREFIX)?;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;

    transcript.extend_from_slice(&prefix);
    transcript.extend_from_slice(&payload);
    Ok(payload)
}

fn rejected(code: u16) -> SessionError {
    let code = ErrorCode::from(code);
    SessionError::Authentication {
        code,
        description: code.reason().to_string(),
    }
}
