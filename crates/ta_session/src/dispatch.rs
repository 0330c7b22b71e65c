//! Per-subsystem packet dispatch.
//!
//! Each subsystem gets an unbounded queue drained by one task, so packets
//! for that subsystem are handled in arrival order and a slow handler never
//! stalls the receive loop. Handler errors and panics are reported back to
//! the handler through [`PacketHandler::exception`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use ta_proto::Packet;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SessionError;

pub trait PacketHandler: Send + Sync + 'static {
    fn handle(&self, packet: Packet) -> Result<(), SessionError>;

    fn exception(&self, err: SessionError) {
        warn!(error = %err, "packet handler failed");
    }
}

pub struct Dispatcher {
    name: &'static str,
    tx: mpsc::UnboundedSender<Packet>,
    task: JoinHandle<()>,
}

impl Dispatcher {
    pub fn spawn(name: &'static str, handler: Arc<dyn PacketHandler>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Packet>();
        let task = tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                let cmd = packet.cmd;
                match catch_unwind(AssertUnwindSafe(|| handler.handle(packet))) {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => handler.exception(err),
                    Err(_) => {
                        warn!(dispatcher = name, ?cmd, "handler panicked");
                        handler.exception(SessionError::HandlerPanicked(format!("{cmd:?}")));
                    }
                }
            }
            debug!(dispatcher = name, "dispatcher stopped");
        });
        Self { name, tx, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue a packet. Returns false once the dispatcher has stopped.
    pub fn dispatch(&self, packet: Packet) -> bool {
        self.tx.send(packet).is_ok()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
