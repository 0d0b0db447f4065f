//! Session lifecycle: connect, disconnect, shutdown.
//!
//! Every function here runs with the server state locked, so a connect or
//! disconnect is observed by other sessions as a single step.
use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::broadcast::{broadcast, close, send_to};
use super::journal::Journal;
use super::registry::{Outbound, SessionId};
use super::server::ServerState;

pub const SHUTDOWN_NOTICE: &str = "Server is shutting down. Goodbye!";

/// Where a connection is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// What ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer closed its side.
    Ended,
    /// Transport error, or the server closed the socket.
    Disconnected,
    /// Removed by an operator.
    Kicked,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ended => "ended",
            Self::Disconnected => "disconnected",
            Self::Kicked => "kicked",
        })
    }
}

/// Register a freshly accepted connection, greet it, and announce it.
pub fn connect(
    st: &mut ServerState,
    journal: &Journal,
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Outbound>,
) -> SessionId {
    let ServerState {
        registry,
        directory,
        ..
    } = &mut *st;
    let session = registry.register(directory, addr, tx);
    let (id, name) = (session.id, session.name.clone());

    journal.chat(&format!("{name} connected"));
    send_to(
        session,
        &format!("Welcome, {name}! You are connected to the chat server."),
    );
    broadcast(registry, &format!("{name} has joined the chat."), Some(id));
    info!(session = %id, %addr, name, "session active");

    if st.shutting_down {
        // Accepted just as shutdown began.
        if let Some(session) = st.registry.get(id) {
            send_to(session, SHUTDOWN_NOTICE);
            close(session);
        }
    }
    id
}

/// Tear a session down. Returns the name it held, or `None` if it was
/// already gone, in which case nothing happens.
pub fn disconnect(
    st: &mut ServerState,
    journal: &Journal,
    id: SessionId,
    reason: DisconnectReason,
) -> Option<String> {
    let session = st.registry.deregister(id)?;
    debug!(session = %id, phase = ?Phase::Closing, "tearing down");
    let name = session.name;
    if st.directory.lookup(&name) == Some(id) {
        st.directory.release(&name);
    }

    journal.chat(&format!("{name} {reason}"));
    broadcast(&st.registry, &format!("{name} has left the chat."), None);
    info!(session = %id, name, %reason, "session closed");
    Some(name)
}

/// Tell every session the server is going away and ask each to hang up.
pub fn shutdown_all(st: &mut ServerState) {
    st.shutting_down = true;
    for session in st.registry.all_sessions() {
        send_to(session, SHUTDOWN_NOTICE);
        close(session);
    }
}
