//! Relay server: shared state, accept loop, per-connection driver.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::codec::{CodecError, LineCodec};
use super::config::Config;
use super::directory::NameDirectory;
use super::journal::{FileSink, Journal};
use super::lifecycle::{self, DisconnectReason, Phase};
use super::registry::{Outbound, SessionId, SessionRegistry};
use super::router;

/// Everything guarded by the one server lock: the live sessions, the names
/// they hold, and the operator secret.
#[derive(Debug, Default)]
pub struct ServerState {
    pub registry: SessionRegistry,
    pub directory: NameDirectory,
    pub operator_secret: Option<String>,
    /// Set once shutdown has begun; late arrivals are sent away at once.
    pub shutting_down: bool,
}

impl ServerState {
    pub fn new(operator_secret: Option<String>) -> Self {
        Self {
            registry: SessionRegistry::new(),
            directory: NameDirectory::new(),
            operator_secret,
            shutting_down: false,
        }
    }

    /// Held names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.directory.names()
    }
}

/// Shared, thread-safe server state.
///
/// Registry and directory sit behind a single lock so that a name is taken
/// exactly when a live session holds it, as seen from any task.
pub type SharedState = Arc<RwLock<ServerState>>;

/// Run the relay with file-backed logs until `shutdown` fires.
///
/// Fails only if the listener cannot be bound.
pub async fn run(
    config: Config,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Bind first, so we fail fast on port conflicts.
    let listener = TcpListener::bind(config.listen_addr()).await?;
    info!("chatrelay listening on {}", listener.local_addr()?);
    info!(path = %config.chat_log.display(), "chat log");
    info!(path = %config.server_log.display(), "server log");
    if config.operator_secret.is_none() {
        warn!("ADMIN_PASSWORD not set; /kick is disabled");
    }

    let (chat_sink, chat_task) = FileSink::spawn(&config.chat_log);
    let (audit_sink, audit_task) = FileSink::spawn(&config.server_log);
    let journal = Journal::new(Arc::new(chat_sink), Arc::new(audit_sink));
    let state: SharedState = Arc::new(RwLock::new(ServerState::new(
        config.operator_secret.clone(),
    )));

    serve(listener, state, journal, shutdown, config.shutdown_grace).await;

    // Every journal handle is gone once the connections are; let the log
    // writers drain.
    let writers = async {
        let _ = tokio::join!(chat_task, audit_task);
    };
    if tokio::time::timeout(config.shutdown_grace, writers).await.is_err() {
        warn!("log writers did not drain before shutdown");
    }
    info!("chatrelay stopped");
    Ok(())
}

/// Accept connections on `listener` until `shutdown` fires, then say goodbye
/// to every session and wait up to `grace` for their connections to flush.
pub async fn serve(
    listener: TcpListener,
    state: SharedState,
    journal: Journal,
    shutdown: CancellationToken,
    grace: Duration,
) {
    let tracker = TaskTracker::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (socket, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        // Usually fd exhaustion; the listener itself is fine.
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                debug!(%addr, "new connection");
                let state = Arc::clone(&state);
                let journal = journal.clone();
                tracker.spawn(handle_client(socket, addr, state, journal));
            }
        }
    }

    {
        let mut st = state.write().await;
        info!("shutting down, notifying {} sessions", st.registry.len());
        lifecycle::shutdown_all(&mut st);
    }
    drop(listener);

    tracker.close();
    if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
        warn!("connections still open after {grace:?}; giving up on them");
    }
}

/// Drive one connection from accept to close.
///
/// Reads are routed under the state lock; writes come only from this
/// session's outbound queue. Once the peer stops sending, the session is
/// `Closing`: reads stop, and whatever is already queued for the peer is
/// written out before the session is torn down.
async fn handle_client(
    socket: TcpStream,
    addr: SocketAddr,
    state: SharedState,
    journal: Journal,
) {
    let mut framed = Framed::new(socket, LineCodec::new());
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    debug!(%addr, phase = ?Phase::Connecting, "session phase");
    let id = {
        let mut st = state.write().await;
        lifecycle::connect(&mut st, &journal, addr, tx)
    };
    let mut phase = Phase::Active;
    debug!(session = %id, ?phase, "session phase");
    let mut reason = DisconnectReason::Disconnected;

    while phase == Phase::Active || (phase == Phase::Closing && !rx.is_empty()) {
        tokio::select! {
            // Incoming line from the client's TCP stream.
            frame = framed.next(), if phase == Phase::Active => match frame {
                Some(Ok(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        let mut st = state.write().await;
                        router::handle_line(&mut st, &journal, id, line);
                    }
                }
                Some(Err(e)) => {
                    warn!(%addr, session = %id, "read error: {e}");
                    record_fault(&state, &journal, id, &e).await;
                    phase = Phase::Closing;
                    debug!(session = %id, ?phase, "session phase");
                }
                None => {
                    reason = DisconnectReason::Ended;
                    phase = Phase::Closing;
                    debug!(session = %id, ?phase, "session phase");
                }
            },

            // Outgoing line queued by any task.
            item = rx.recv() => match item {
                Some(Outbound::Line(text)) => {
                    if let Err(e) = framed.send(text).await {
                        warn!(%addr, session = %id, "write error: {e}");
                        record_fault(&state, &journal, id, &e).await;
                        reason = DisconnectReason::Disconnected;
                        break;
                    }
                }
                // Kicked, shut down, or deregistered elsewhere.
                Some(Outbound::Close) | None => break,
            },
        }
    }

    {
        let mut st = state.write().await;
        lifecycle::disconnect(&mut st, &journal, id, reason);
    }
    // Best effort: the peer may already be gone.
    let _ = SinkExt::<String>::close(&mut framed).await;
    debug!(session = %id, phase = ?Phase::Closed, "session phase");
}

/// Note a transport fault in the chat log under the session's current name.
async fn record_fault(state: &SharedState, journal: &Journal, id: SessionId, err: &CodecError) {
    let st = state.read().await;
    if let Some(session) = st.registry.get(id) {
        journal.chat(&format!("{} error: {err}", session.name));
    }
}
