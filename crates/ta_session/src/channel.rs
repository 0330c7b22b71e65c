//! Channel multiplexing of chunk fetches.
//!
//! Each request takes a free 16-bit channel id and registers a sink before
//! the request packet goes out. Fragments for that id are reassembled in
//! arrival order and the sink gets one callback when the chunk completes or
//! fails. Ids wrap around but are never handed out while still registered.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use ta_proto::channel::{parse_headers, split_channel, ChannelFailure, ChannelRequest, HeaderRecord};
use ta_proto::{FileId, Packet, PacketType};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::dispatch::PacketHandler;
use crate::error::SessionError;
use crate::session::PacketSend;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel {channel} failed with code {code:#06x}")]
    Remote { channel: u16, code: u16 },

    #[error("channel {0} aborted by the access point")]
    Aborted(u16),

    #[error("connection lost")]
    ConnectionLost,

    #[error("malformed fragment on channel {channel}: {reason}")]
    Malformed { channel: u16, reason: String },
}

/// Receiver of one chunk fetch.
pub trait ChannelSink: Send + Sync {
    fn on_header(&self, _id: u8, _data: &[u8]) {}

    fn on_complete(&self, data: Bytes);

    fn on_error(&self, err: ChannelError);

    /// The consumer went away; pending fragments are discarded.
    fn is_abandoned(&self) -> bool {
        false
    }
}

struct ChannelState {
    sink: Arc<dyn ChannelSink>,
    in_headers: bool,
    data: BytesMut,
}

#[derive(Default)]
struct ChannelTable {
    next_id: u16,
    channels: HashMap<u16, ChannelState>,
}

/// What to tell a sink once the table lock is released.
enum Delivery {
    Headers(Arc<dyn ChannelSink>, Vec<HeaderRecord>),
    Complete(Arc<dyn ChannelSink>, Bytes),
    Failed(Arc<dyn ChannelSink>, ChannelError),
}

pub struct ChannelManager {
    sender: Arc<dyn PacketSend>,
    table: Mutex<ChannelTable>,
}

impl ChannelManager {
    pub fn new(sender: Arc<dyn PacketSend>) -> Self {
        Self {
            sender,
            table: Mutex::new(ChannelTable::default()),
        }
    }

    /// Request chunk `index` of `file_id` and register `sink` for the answer.
    pub async fn request(
        &self,
        file_id: FileId,
        index: u32,
        chunk_size: usize,
        sink: Arc<dyn ChannelSink>,
    ) -> Result<u16, SessionError> {
        let start = index as u64 * chunk_size as u64;
        let end = start + chunk_size as u64;
        let id = self.register(sink)?;

        let request = match ChannelRequest::for_bytes(id, file_id, start, end) {
            Ok(request) => request,
            Err(err) => {
                self.table.lock().channels.remove(&id);
                return Err(err.into());
            }
        };
        trace!(channel = id, %file_id, index, "requesting chunk");

        if let Err(err) = self
            .sender
            .send_packet(Packet::new(PacketType::StreamChunk, request.encode()))
            .await
        {
            self.table.lock().channels.remove(&id);
            return Err(err);
        }
        Ok(id)
    }

    pub fn in_flight(&self) -> usize {
        self.table.lock().channels.len()
    }

    /// Fail every registered channel. Used when the connection drops.
    pub fn abort_all(&self, err: ChannelError) {
        let drained: Vec<ChannelState> = {
            let mut table = self.table.lock();
            table.channels.drain().map(|(_, state)| state).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), error = %err, "failing in-flight channels");
        }
        for state in drained {
            state.sink.on_error(err.clone());
        }
    }

    /// Drop channels whose sinks report themselves abandoned.
    pub fn release_abandoned(&self) -> usize {
        let mut table = self.table.lock();
        let before = table.channels.len();
        table.channels.retain(|_, state| !state.sink.is_abandoned());
        before - table.channels.len()
    }

    fn register(&self, sink: Arc<dyn ChannelSink>) -> Result<u16, SessionError> {
        let mut table = self.table.lock();
        if table.channels.len() > u16::MAX as usize {
            return Err(SessionError::Transport("no free channel ids".into()));
        }
        loop {
            let id = table.next_id;
            table.next_id = table.next_id.wrapping_add(1);
            if !table.channels.contains_key(&id) {
                table.channels.insert(
                    id,
                    ChannelState {
                        sink,
                        in_headers: true,
                        data: BytesMut::new(),
                    },
                );
                return Ok(id);
            }
        }
    }

    fn on_fragment(&self, payload: &Bytes) -> Result<(), SessionError> {
        let (id, body) = split_channel(payload)?;
        let delivery = {
            let mut table = self.table.lock();
            let Some(state) = table.channels.get_mut(&id) else {
                trace!(channel = id, "fragment for unregistered channel");
                return Ok(());
            };

            if state.sink.is_abandoned() {
                table.channels.remove(&id);
                debug!(channel = id, "released abandoned channel");
                return Ok(());
            }

            if body.is_empty() {
                table
                    .channels
                    .remove(&id)
                    .map(|state| Delivery::Complete(state.sink, state.data.freeze()))
            } else if state.in_headers {
                match parse_headers(&body) {
                    Ok(section) => {
                        if section.finished {
                            state.in_headers = false;
                            state.data.extend_from_slice(&section.trailing);
                        }
                        Some(Delivery::Headers(state.sink.clone(), section.records))
                    }
                    Err(err) => table.channels.remove(&id).map(|state| {
                        Delivery::Failed(
                            state.sink,
                            ChannelError::Malformed {
                                channel: id,
                                reason: err.to_string(),
                            },
                        )
                    }),
                }
            } else {
                state.data.extend_from_slice(&body);
                None
            }
        };

        match delivery {
            Some(Delivery::Headers(sink, records)) => {
                for record in records {
                    sink.on_header(record.id, &record.data);
                }
            }
            Some(Delivery::Complete(sink, data)) => {
                trace!(channel = id, len = data.len(), "chunk complete");
                sink.on_complete(data);
            }
            Some(Delivery::Failed(sink, err)) => sink.on_error(err),
            None => {}
        }
        Ok(())
    }

    fn on_failure(&self, cmd: PacketType, payload: &[u8]) -> Result<(), SessionError> {
        let failure = ChannelFailure::decode(payload)?;
        let state = self.table.lock().channels.remove(&failure.channel);
        let err = match cmd {
            PacketType::ChannelAbort => ChannelError::Aborted(failure.channel),
            _ => ChannelError::Remote {
                channel: failure.channel,
                code: failure.code,
            },
        };
        match state {
            Some(state) => {
                debug!(error = %err, "channel failed");
                state.sink.on_error(err);
            }
            None => trace!(channel = failure.channel, "failure for unregistered channel"),
        }
        Ok(())
    }
}

impl PacketHandler for ChannelManager {
    fn handle(&self, packet: Packet) -> Result<(), SessionError> {
        match packet.cmd {
            PacketType::StreamChunkRes => self.on_fragment(&packet.payload),
            PacketType::ChannelError | PacketType::ChannelAbort => {
                self.on_failure(packet.cmd, &packet.payload)
            }
            other => {
                warn!(cmd = ?other, "channel manager got unexpected packet");
                Ok(())
            }
        }
    }
}
