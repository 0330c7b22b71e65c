//! Long-lived session over a replaceable connection.
//!
//! The [`Session`] handle is stable for its whole life. The connection
//! underneath it (socket, cipher pair, receive task) is swapped out wholesale
//! when it fails: a fresh handshake and login with the reusable credentials
//! from the last welcome. Callers that need the connection wait on the state
//! channel until it is `Ready` again, or until the session is closed or has
//! permanently failed.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use ta_crypto::signature::ServerVerifier;
use ta_proto::login::{ApWelcome, Credentials};
use ta_proto::{Packet, PacketType};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::audio_key::AudioKeyManager;
use crate::channel::{ChannelError, ChannelManager};
use crate::config::SessionConfig;
use crate::connection::{self, Connection, PacketReader, Transport};
use crate::dispatch::{Dispatcher, PacketHandler};
use crate::error::SessionError;
use crate::resolver::{AccessPointSource, ApResolver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    Closed,
    Failed(String),
}

/// Outbound packet path used by the subsystems. Waits for the connection to
/// be ready before sending.
#[async_trait]
pub trait PacketSend: Send + Sync {
    async fn send_packet(&self, packet: Packet) -> Result<(), SessionError>;
}

/// Where the receive loop hands a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Session,
    Channel,
    AudioKey,
    Mercury,
    Ignore,
    Unknown,
}

pub fn route(cmd: PacketType) -> Route {
    match cmd {
        PacketType::Ping
        | PacketType::PongAck
        | PacketType::CountryCode
        | PacketType::ProductInfo
        | PacketType::LicenseVersion => Route::Session,
        PacketType::StreamChunkRes | PacketType::ChannelError | PacketType::ChannelAbort => {
            Route::Channel
        }
        PacketType::AesKey | PacketType::AesKeyError => Route::AudioKey,
        PacketType::MercuryReq
        | PacketType::MercurySub
        | PacketType::MercuryUnsub
        | PacketType::MercuryEvent => Route::Mercury,
        PacketType::SecretBlock
        | PacketType::LegacyWelcome
        | PacketType::UnknownDataAllZeros
        | PacketType::Pause
        | PacketType::Image
        | PacketType::PreferredLocale
        | PacketType::TrackEndedTime => Route::Ignore,
        // Client-to-server commands never arrive legitimately.
        PacketType::StreamChunk
        | PacketType::RequestKey
        | PacketType::Pong
        | PacketType::Login
        | PacketType::ApWelcome
        | PacketType::AuthFailure
        | PacketType::Unknown(_) => Route::Unknown,
    }
}

struct SessionInner {
    config: SessionConfig,
    verifier: ServerVerifier,
    resolver: ApResolver,
    credentials: Mutex<Credentials>,
    state: watch::Sender<SessionState>,
    transport: RwLock<Option<Arc<Transport>>>,
    generation: AtomicU64,
    reconnects: AtomicU32,
    reconnecting: AtomicBool,
    welcome: RwLock<Option<ApWelcome>>,
    country_code: RwLock<Option<String>>,
    product_info: RwLock<Option<Bytes>>,
    channels: Arc<ChannelManager>,
    audio_keys: Arc<AudioKeyManager>,
    channel_dispatch: Dispatcher,
    audio_key_dispatch: Dispatcher,
    mercury: RwLock<Option<Dispatcher>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

struct SessionSender(Weak<SessionInner>);

#[async_trait]
impl PacketSend for SessionSender {
    async fn send_packet(&self, packet: Packet) -> Result<(), SessionError> {
        let inner = self.0.upgrade().ok_or(SessionError::Closed)?;
        inner.send(packet).await
    }
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Resolve an access point, handshake and log in. Authentication
    /// failures surface here and are not retried.
    pub async fn connect(
        config: SessionConfig,
        source: Arc<dyn AccessPointSource>,
        credentials: Credentials,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let verifier = config.server_verifier()?;
        let resolver = ApResolver::new(source, config.fallback_access_point.clone());
        let key_timeout = config.audio_key_timeout();
        let (state, _) = watch::channel(SessionState::Connecting);

        let inner = Arc::new_cyclic(|weak: &Weak<SessionInner>| {
            let sender: Arc<dyn PacketSend> = Arc::new(SessionSender(weak.clone()));
            let channels = Arc::new(ChannelManager::new(sender.clone()));
            let audio_keys = Arc::new(AudioKeyManager::new(sender, key_timeout));
            SessionInner {
                channel_dispatch: Dispatcher::spawn("channel", channels.clone()),
                audio_key_dispatch: Dispatcher::spawn("audio-key", audio_keys.clone()),
                config,
                verifier,
                resolver,
                credentials: Mutex::new(credentials),
                state,
                transport: RwLock::new(None),
                generation: AtomicU64::new(0),
                reconnects: AtomicU32::new(0),
                reconnecting: AtomicBool::new(false),
                welcome: RwLock::new(None),
                country_code: RwLock::new(None),
                product_info: RwLock::new(None),
                channels,
                audio_keys,
                mercury: RwLock::new(None),
                reader_task: Mutex::new(None),
            }
        });

        let addr = inner.resolver.resolve().await;
        let credentials = inner.credentials.lock().clone();
        let conn = connection::connect(&addr, &inner.config, &inner.verifier, &credentials).await?;
        SessionInner::install(&inner, conn);
        Ok(Self { inner })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the connection is usable.
    pub async fn ready(&self) -> Result<(), SessionError> {
        self.inner.wait_ready().await.map(|_| ())
    }

    pub async fn send(&self, cmd: PacketType, payload: impl Into<Bytes>) -> Result<(), SessionError> {
        self.inner.send(Packet::new(cmd, payload)).await
    }

    /// Reconnection attempts made since the session was created.
    pub fn reconnect_count(&self) -> u32 {
        self.inner.reconnects.load(Ordering::SeqCst)
    }

    pub fn country_code(&self) -> Option<String> {
        self.inner.country_code.read().clone()
    }

    /// Raw product info payload, as last received.
    pub fn product_info(&self) -> Option<Bytes> {
        self.inner.product_info.read().clone()
    }

    pub fn welcome(&self) -> Option<ApWelcome> {
        self.inner.welcome.read().clone()
    }

    pub fn username(&self) -> Option<String> {
        self.inner
            .welcome
            .read()
            .as_ref()
            .map(|w| w.canonical_username.clone())
    }

    pub fn channels(&self) -> Arc<ChannelManager> {
        self.inner.channels.clone()
    }

    pub fn audio_keys(&self) -> Arc<AudioKeyManager> {
        self.inner.audio_keys.clone()
    }

    /// Route Mercury packets to `handler`. Without one they are dropped.
    pub fn set_mercury_handler(&self, handler: Arc<dyn PacketHandler>) {
        *self.inner.mercury.write() = Some(Dispatcher::spawn("mercury", handler));
    }

    /// Close the session. Pending channel fetches and key requests fail, and
    /// later sends return `SessionError::Closed`.
    pub fn close(&self) {
        {
            // Same lock as `install`, so a reconnect cannot revive the session.
            let mut transport = self.inner.transport.write();
            if self.inner.is_closed() {
                return;
            }
            info!("closing session");
            self.inner.state.send_replace(SessionState::Closed);
            transport.take();
            if let Some(task) = self.inner.reader_task.lock().take() {
                task.abort();
            }
        }
        self.inner.channels.abort_all(ChannelError::ConnectionLost);
        self.inner.audio_keys.fail_all();
    }
}

#[async_trait]
impl PacketSend for Session {
    async fn send_packet(&self, packet: Packet) -> Result<(), SessionError> {
        self.inner.send(packet).await
    }
}

impl SessionInner {
    fn is_closed(&self) -> bool {
        matches!(*self.state.borrow(), SessionState::Closed)
    }

    /// Swap in a freshly authenticated connection. Returns false, dropping
    /// the connection, if the session was closed meanwhile.
    fn install(inner: &Arc<Self>, conn: Connection) -> bool {
        let Connection {
            addr,
            reader,
            writer,
            welcome,
        } = conn;

        // Held until the state is Ready; `close` takes it too.
        let mut transport = inner.transport.write();
        if inner.is_closed() {
            return false;
        }

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *inner.credentials.lock() = welcome.reusable_credentials();
        *inner.welcome.write() = Some(welcome);
        *transport = Some(Arc::new(Transport::new(writer, generation)));

        let task = tokio::spawn(receive_loop(Arc::downgrade(inner), reader, generation));
        if let Some(old) = inner.reader_task.lock().replace(task) {
            old.abort();
        }
        inner.state.send_replace(SessionState::Ready);
        drop(transport);
        info!(ap = %addr, generation, "session ready");
        true
    }

    async fn wait_ready(&self) -> Result<Arc<Transport>, SessionError> {
        let mut rx = self.state.subscribe();
        loop {
            let ready = match &*rx.borrow_and_update() {
                SessionState::Ready => true,
                SessionState::Connecting => false,
                SessionState::Closed => return Err(SessionError::Closed),
                SessionState::Failed(reason) => return Err(SessionError::Failed(reason.clone())),
            };
            if ready {
                if let Some(transport) = self.transport.read().clone() {
                    return Ok(transport);
                }
            }
            rx.changed().await.map_err(|_| SessionError::Closed)?;
        }
    }

    async fn send(self: &Arc<Self>, packet: Packet) -> Result<(), SessionError> {
        let transport = self.wait_ready().await?;
        match transport.encrypt_and_send(packet).await {
            Ok(()) => Ok(()),
            Err(err) => {
                Self::connection_lost(self, transport.generation(), err.to_string());
                Err(err)
            }
        }
    }

    fn handle_packet(self: &Arc<Self>, packet: Packet) {
        match route(packet.cmd) {
            Route::Session => self.handle_session_packet(packet),
            Route::Channel => {
                if !self.channel_dispatch.dispatch(packet) {
                    warn!(dispatcher = self.channel_dispatch.name(), "dispatcher stopped");
                }
            }
            Route::AudioKey => {
                if !self.audio_key_dispatch.dispatch(packet) {
                    warn!(dispatcher = self.audio_key_dispatch.name(), "dispatcher stopped");
                }
            }
            Route::Mercury => match self.mercury.read().as_ref() {
                Some(dispatcher) => {
                    dispatcher.dispatch(packet);
                }
                None => debug!(cmd = ?packet.cmd, "no mercury handler, packet dropped"),
            },
            Route::Ignore => trace!(cmd = ?packet.cmd, "ignored packet"),
            Route::Unknown => {
                warn!(cmd = ?packet.cmd, len = packet.payload.len(), "unknown packet dropped")
            }
        }
    }

    fn handle_session_packet(self: &Arc<Self>, packet: Packet) {
        match packet.cmd {
            PacketType::Ping => {
                let inner = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = inner.send(Packet::new(PacketType::Pong, packet.payload)).await {
                        debug!(error = %err, "pong not sent");
                    }
                });
            }
            PacketType::PongAck => trace!("pong acknowledged"),
            PacketType::CountryCode => {
                let code = String::from_utf8_lossy(&packet.payload).into_owned();
                info!(country = %code, "country code received");
                *self.country_code.write() = Some(code);
            }
            PacketType::ProductInfo => {
                debug!(len = packet.payload.len(), "product info received");
                *self.product_info.write() = Some(packet.payload);
            }
            PacketType::LicenseVersion => {
                let id = packet
                    .payload
                    .get(..2)
                    .map(|raw| u16::from_be_bytes([raw[0], raw[1]]));
                debug!(?id, "license version received");
            }
            other => trace!(cmd = ?other, "unhandled session packet"),
        }
    }

    /// Tear down connection `generation` and start reconnecting. Stale
    /// generations and repeated reports are ignored.
    fn connection_lost(inner: &Arc<Self>, generation: u64, reason: String) {
        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        {
            let mut transport = inner.transport.write();
            if !matches!(*inner.state.borrow(), SessionState::Ready) {
                return;
            }
            if inner.reconnecting.swap(true, Ordering::SeqCst) {
                return;
            }
            warn!(generation, reason = %reason, "connection lost");
            inner.state.send_replace(SessionState::Connecting);
            transport.take();
        }
        inner.channels.abort_all(ChannelError::ConnectionLost);
        inner.audio_keys.fail_all();
        tokio::spawn(reconnect_loop(Arc::downgrade(inner)));
    }

    fn fail(&self, reason: String) {
        self.reconnecting.store(false, Ordering::SeqCst);
        {
            let mut transport = self.transport.write();
            if self.is_closed() {
                return;
            }
            error!(reason = %reason, "session failed");
            self.state.send_replace(SessionState::Failed(reason));
            transport.take();
        }
        self.channels.abort_all(ChannelError::ConnectionLost);
        self.audio_keys.fail_all();
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
    }
}

async fn receive_loop(weak: Weak<SessionInner>, mut reader: PacketReader, generation: u64) {
    loop {
        let next = reader.next().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match next {
            Some(Ok(packet)) => inner.handle_packet(packet),
            Some(Err(err)) => {
                warn!(error = %err, generation, "receive failed");
                SessionInner::connection_lost(&inner, generation, err.to_string());
                return;
            }
            None => {
                SessionInner::connection_lost(&inner, generation, "closed by access point".into());
                return;
            }
        }
    }
}

async fn reconnect_loop(weak: Weak<SessionInner>) {
    let mut attempt: u32 = 0;
    loop {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.is_closed() {
            inner.reconnecting.store(false, Ordering::SeqCst);
            return;
        }

        attempt += 1;
        inner.reconnects.fetch_add(1, Ordering::SeqCst);
        let addr = inner.resolver.resolve().await;
        let credentials = inner.credentials.lock().clone();
        info!(attempt, ap = %addr, "reconnecting");

        match connection::connect(&addr, &inner.config, &inner.verifier, &credentials).await {
            Ok(conn) => {
                inner.reconnecting.store(false, Ordering::SeqCst);
                if !SessionInner::install(&inner, conn) {
                    debug!("session closed while reconnecting");
                }
                return;
            }
            Err(err @ SessionError::Authentication { .. }) => {
                inner.fail(format!("reconnect rejected: {err}"));
                return;
            }
            Err(err) => warn!(attempt, error = %err, "reconnect attempt failed"),
        }

        if let Some(max) = inner.config.max_reconnect_attempts {
            if attempt >= max {
                inner.fail(format!("gave up after {attempt} reconnect attempts"));
                return;
            }
        }
        let backoff = inner.config.reconnect_backoff();
        drop(inner);
        tokio::time::sleep(backoff).await;
    }
}
