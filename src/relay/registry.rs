//! Live sessions and their mutable state.
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;

use super::directory::NameDirectory;

/// Identity of one accepted connection. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Work item for a connection's writer half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One line of text; the codec appends the terminator.
    Line(String),
    /// Flush what is queued, then hang up.
    Close,
}

/// One live connection.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    /// Current display name. Mirrors the directory entry.
    pub name: String,
    pub addr: SocketAddr,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Session {
    /// Queue an item for this connection. Returns false if the connection's
    /// writer is already gone.
    pub(crate) fn push(&self, item: Outbound) -> bool {
        self.tx.send(item).is_ok()
    }
}

/// The set of active sessions, in connection order.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, Session>,
    next_id: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session with a fresh guest name and claim that name in the
    /// directory.
    pub fn register(
        &mut self,
        directory: &mut NameDirectory,
        addr: SocketAddr,
        tx: mpsc::UnboundedSender<Outbound>,
    ) -> &Session {
        self.next_id += 1;
        let id = SessionId(self.next_id);
        let mut name = directory.allocate_guest_name();
        while !directory.claim(&name, id) {
            name = directory.allocate_guest_name();
        }
        self.sessions
            .entry(id)
            .or_insert(Session { id, name, addr, tx })
    }

    /// Drop a session from the live set. The caller releases its name.
    pub fn deregister(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Record a new current name for a session the directory already moved.
    pub fn rename(&mut self, id: SessionId, name: &str) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.name = name.to_owned();
                true
            }
            None => false,
        }
    }

    pub fn all_sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
