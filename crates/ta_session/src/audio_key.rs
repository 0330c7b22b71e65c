use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use ta_crypto::AudioKey;
use ta_proto::audio_key::{AudioKeyRequest, AudioKeyResponse};
use ta_proto::{FileId, ItemGid, Packet, PacketType};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::dispatch::PacketHandler;
use crate::error::SessionError;
use crate::session::PacketSend;

/// Source of per-file decryption keys.
#[async_trait]
pub trait AudioKeyProvider: Send + Sync {
    async fn audio_key(&self, gid: ItemGid, file_id: FileId) -> Result<AudioKey, SessionError>;
}

pub struct AudioKeyManager {
    sender: Arc<dyn PacketSend>,
    seq: AtomicU32,
    pending: Mutex<HashMap<u32, oneshot::Sender<AudioKeyResponse>>>,
    timeout: Duration,
}

impl AudioKeyManager {
    pub fn new(sender: Arc<dyn PacketSend>, timeout: Duration) -> Self {
        Self {
            sender,
            seq: AtomicU32::new(0),
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Drop every pending request; their callers see a connection error.
    pub fn fail_all(&self) {
        let dropped = {
            let mut pending = self.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        if dropped > 0 {
            debug!(count = dropped, "failed pending audio key requests");
        }
    }

    async fn request_once(&self, gid: ItemGid, file_id: FileId) -> Result<AudioKey, SessionError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(seq, tx);

        let request = AudioKeyRequest { file_id, gid, seq };
        if let Err(err) = self
            .sender
            .send_packet(Packet::new(PacketType::RequestKey, request.encode()))
            .await
        {
            self.pending.lock().remove(&seq);
            return Err(err);
        }
        trace!(seq, %file_id, "audio key requested");

        match tokio::time::timeout(self.timeout, rx).await {
            Err(_) => {
                self.pending.lock().remove(&seq);
                Err(SessionError::AudioKey(format!("request {seq} timed out")))
            }
            Ok(Err(_)) => Err(SessionError::AudioKey("connection lost".into())),
            Ok(Ok(AudioKeyResponse::Key { key, .. })) => Ok(AudioKey(key)),
            Ok(Ok(AudioKeyResponse::Error { code, .. })) => Err(SessionError::AudioKey(format!(
                "access point refused key for {file_id} (code {code:#06x})"
            ))),
        }
    }
}

#[async_trait]
impl AudioKeyProvider for AudioKeyManager {
    async fn audio_key(&self, gid: ItemGid, file_id: FileId) -> Result<AudioKey, SessionError> {
        match self.request_once(gid, file_id).await {
            Ok(key) => Ok(key),
            Err(SessionError::Closed) => Err(SessionError::Closed),
            Err(err) => {
                warn!(error = %err, %file_id, "audio key request failed, retrying once");
                self.request_once(gid, file_id).await
            }
        }
    }
}

impl PacketHandler for AudioKeyManager {
    fn handle(&self, packet: Packet) -> Result<(), SessionError> {
        let response = match packet.cmd {
            PacketType::AesKey => AudioKeyResponse::decode_key(&packet.payload)?,
            PacketType::AesKeyError => AudioKeyResponse::decode_error(&packet.payload)?,
            other => {
                warn!(cmd = ?other, "audio key manager got unexpected packet");
                return Ok(());
            }
        };

        let seq = response.seq();
        match self.pending.lock().remove(&seq) {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!(seq, "audio key response for unknown request"),
        }
        Ok(())
    }
}
