//! Per-connection state and the task that drives one participant from the
//! username prompt through disconnect.

use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU8, Ordering},
    },
};

use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    broadcast::Broadcaster,
    command::{CommandRouter, Input},
    config::ServerConfig,
    connection::{Connection, LineError, spawn_writer},
    protocol::{Message, USERNAME_PROMPT},
};

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Active,
    Closed,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Handshaking,
            1 => SessionState::Active,
            _ => SessionState::Closed,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue is full")]
    Backlogged,
    #[error("session writer has shut down")]
    Closed,
}

struct Shared {
    id: SessionId,
    username: OnceLock<String>,
    state: AtomicU8,
    outbound: mpsc::Sender<String>,
    closer: CancellationToken,
}

/// Cheap, cloneable view of a session used for membership and delivery.
/// It never owns the socket; closing it only signals the owning task.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub fn new(id: SessionId, outbound: mpsc::Sender<String>, closer: CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                username: OnceLock::new(),
                state: AtomicU8::new(SessionState::Handshaking as u8),
                outbound,
                closer,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    /// The negotiated name, or `"Unknown"` before the handshake finished.
    pub fn username(&self) -> &str {
        self.shared
            .username
            .get()
            .map(String::as_str)
            .unwrap_or("Unknown")
    }

    /// Sets the username once. Later calls are ignored and return `false`.
    pub fn assign_username(&self, username: String) -> bool {
        self.shared.username.set(username).is_ok()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.shared
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn activate(&self) -> bool {
        self.transition(SessionState::Handshaking, SessionState::Active)
    }

    pub(crate) fn deactivate(&self) -> bool {
        self.transition(SessionState::Active, SessionState::Closed)
    }

    /// Closes a session that never made it into the registry.
    pub(crate) fn abandon(&self) -> bool {
        self.transition(SessionState::Handshaking, SessionState::Closed)
    }

    /// Queues one line without waiting. A full queue means the peer has
    /// stopped reading.
    pub fn deliver(&self, line: &str) -> Result<(), DeliveryError> {
        self.shared
            .outbound
            .try_send(line.to_string())
            .map_err(|err| match err {
                TrySendError::Full(_) => DeliveryError::Backlogged,
                TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Asks the owning task to shut the connection down. Idempotent.
    pub fn close(&self) {
        self.shared.closer.cancel();
    }

    pub fn is_close_requested(&self) -> bool {
        self.shared.closer.is_cancelled()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id())
            .field("username", &self.username())
            .field("state", &self.state())
            .finish()
    }
}

/// `Anonymous_<fnv1a(ip)>`; the same peer address always yields the same name.
pub fn fallback_username(ip: &IpAddr) -> String {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let hash = ip.to_string().bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    });
    format!("Anonymous_{hash}")
}

/// One participant: owns the read half, its writer task, and the handle
/// that the registry sees.
pub struct Session<R> {
    handle: SessionHandle,
    connection: Connection<R>,
    peer: SocketAddr,
    writer: JoinHandle<()>,
}

impl<R> Session<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn start<W>(
        id: SessionId,
        peer: SocketAddr,
        reader: R,
        writer: W,
        closer: CancellationToken,
        config: &ServerConfig,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
        let writer = spawn_writer(writer, outbound_rx, closer.clone());
        Self {
            handle: SessionHandle::new(id, outbound_tx, closer.clone()),
            connection: Connection::new(reader, config.max_line_len, closer),
            peer,
            writer,
        }
    }

    /// Runs the handshake and the message loop, then performs the one-shot
    /// departure. Returns once the writer has released the socket.
    pub async fn run(mut self, broadcaster: &Broadcaster) {
        let id = self.handle.id();
        let username = match self.negotiate_username().await {
            Some(username) if !self.connection.is_closed() => username,
            _ => {
                debug!(session = id, peer = %self.peer, "closed during handshake");
                self.handle.abandon();
                self.finish().await;
                return;
            }
        };

        self.handle.assign_username(username);
        if !broadcaster.join(&self.handle) {
            self.handle.abandon();
            self.finish().await;
            return;
        }
        info!(session = id, peer = %self.peer, username = self.handle.username(), "client joined");

        let router = CommandRouter::new(broadcaster.clone());
        self.message_loop(broadcaster, &router).await;

        if broadcaster.depart(&self.handle) {
            info!(
                session = id,
                username = self.handle.username(),
                active = broadcaster.registry().len(),
                "client left"
            );
        }
        self.finish().await;
    }

    /// `None` means the peer sent a username line over the length limit. The
    /// rest of that line is still unread, so the connection has been closed.
    async fn negotiate_username(&mut self) -> Option<String> {
        if let Err(err) = self.handle.deliver(USERNAME_PROMPT) {
            debug!(session = self.handle.id(), %err, "failed to send username prompt");
        }

        let candidate = match self.connection.read_line().await {
            Ok(Some(line)) => line.trim().to_string(),
            Ok(None) => String::new(),
            Err(err @ LineError::TooLong { .. }) => {
                info!(session = self.handle.id(), %err, "rejecting username line");
                self.connection.close();
                return None;
            }
            Err(err) => {
                debug!(session = self.handle.id(), %err, "unreadable username line");
                String::new()
            }
        };

        if candidate.is_empty() {
            Some(fallback_username(&self.peer.ip()))
        } else {
            Some(candidate)
        }
    }

    async fn message_loop(&mut self, broadcaster: &Broadcaster, router: &CommandRouter) {
        let id = self.handle.id();
        loop {
            let line = match self.connection.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!(session = id, "peer closed the connection");
                    break;
                }
                Err(err) => {
                    info!(session = id, %err, "read failed");
                    break;
                }
            };

            match Input::classify(&line) {
                Input::Quit => {
                    debug!(session = id, "quit requested");
                    break;
                }
                Input::Command(command) => router.dispatch(&self.handle, &command),
                Input::Chat(text) => {
                    let message = Message::chat(id, self.handle.username(), text);
                    broadcaster.broadcast(&message, Some(id));
                }
            }
        }
    }

    async fn finish(self) {
        self.connection.close();
        if let Err(err) = self.writer.await {
            debug!(session = self.handle.id(), ?err, "writer task ended abnormally");
        }
    }
}
