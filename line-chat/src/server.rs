use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result};
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    broadcast::Broadcaster,
    config::ServerConfig,
    protocol::Message,
    registry::Registry,
    session::{Session, SessionId},
};

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

struct ServerState {
    broadcaster: Broadcaster,
    config: ServerConfig,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    sessions: TaskTracker,
}

impl Server {
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        let broadcaster = Broadcaster::new(Arc::new(Registry::new()));
        Self {
            listener,
            state: Arc::new(ServerState {
                broadcaster,
                config,
                next_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
                sessions: TaskTracker::new(),
            }),
        }
    }

    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        Ok(Self::new(listener, config))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves, then notifies and closes
    /// every session and waits for their tasks. An accept failure is fatal and
    /// is returned after the same drain.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, state } = self;
        tokio::pin!(shutdown);

        let outcome = loop {
            select! {
                _ = &mut shutdown => break Ok(()),
                accept_result = listener.accept() => {
                    if let Err(err) = handle_accept_result(accept_result, &state) {
                        error!(error = ?err, "accept loop failed");
                        break Err(anyhow::Error::from(err).context("accept loop failed"));
                    }
                }
            }
        };

        drop(listener);
        handle_shutdown(&state).await;
        outcome
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(state: &ServerState) {
    info!("server shutting down");
    let notice = Message::shutdown();
    for session in state.broadcaster.registry().drain() {
        if let Err(err) = session.deliver(&notice.body) {
            debug!(session = session.id(), %err, "failed to queue shutdown notice");
        }
    }
    state.shutdown.cancel();
    state.sessions.close();
    state.sessions.wait().await;
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
) -> std::io::Result<()> {
    let (stream, peer) = result?;
    info!(%peer, "new client connected");
    spawn_client_handler(stream, peer, state);
    Ok(())
}

fn spawn_client_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<ServerState>) {
    let id: SessionId = state.next_id.fetch_add(1, Ordering::Relaxed);
    let tracker = state.sessions.clone();
    let state = Arc::clone(state);
    tracker.spawn(async move {
        if let Err(err) = stream.set_nodelay(true) {
            warn!(%peer, error = ?err, "failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        let session = Session::start(
            id,
            peer,
            BufReader::new(reader),
            writer,
            state.shutdown.child_token(),
            &state.config,
        );
        session.run(&state.broadcaster).await;
    });
}
