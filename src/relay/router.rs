//! Command dispatch.
//!
//! [`handle_line`] classifies a line and runs the matching handler against
//! the locked server state. Each handler either succeeds with a detail for
//! the audit log or fails with a [`CommandError`], whose text goes back to
//! the sender only.
use tracing::{debug, warn};

use super::broadcast::{broadcast, close, send_to, send_to_id};
use super::command::{Command, UsageError};
use super::directory::RenameError;
use super::journal::Journal;
use super::lifecycle::{self, DisconnectReason};
use super::registry::SessionId;
use super::server::ServerState;

pub const KICK_NOTICE: &str = "You have been kicked from the chat by an administrator.";

/// A command that could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("No such user: {0}")]
    NoSuchUser(String),
    #[error("You cannot whisper to yourself")]
    WhisperToSelf,
    #[error("Whisper message cannot be empty")]
    EmptyWhisper,
    #[error(transparent)]
    Rename(#[from] RenameError),
    #[error("Operator commands are disabled")]
    OperatorDisabled,
    #[error("Incorrect admin password")]
    WrongPassword,
    #[error("You cannot kick yourself")]
    KickSelf,
    #[error("Unknown command: {0}")]
    Unknown(String),
}

/// Process one trimmed, non-empty line from `sender`. Lines from a session
/// that is no longer registered are dropped.
pub fn handle_line(st: &mut ServerState, journal: &Journal, sender: SessionId, line: &str) {
    let Some(actor) = st.registry.get(sender).map(|s| s.name.clone()) else {
        debug!(session = %sender, "line from closed session ignored");
        return;
    };

    let parsed = Command::parse(line);
    let label = match &parsed {
        Ok(command) => command.label().to_owned(),
        Err(usage) => usage.command.to_owned(),
    };
    let outcome = match parsed {
        Ok(Command::Chat(text)) => {
            chat(st, journal, sender, &actor, &text);
            return;
        }
        Ok(Command::Whisper { target, text }) => whisper(st, sender, &actor, &target, &text),
        Ok(Command::Rename { name }) => rename(st, sender, &actor, &name),
        Ok(Command::Kick { target, password }) => {
            kick(st, journal, sender, &actor, &target, &password)
        }
        Ok(Command::ListClients) => list_clients(st, sender),
        Ok(Command::Unknown(name)) => Err(CommandError::Unknown(name)),
        Err(usage) => Err(CommandError::from(usage)),
    };

    match outcome {
        Ok(detail) => {
            debug!(actor, command = label, "command ok");
            journal.audit(&format!("{actor} {label} OK: {detail}"));
        }
        Err(e) => {
            debug!(actor, command = label, "command failed: {e}");
            send_to_id(&st.registry, sender, &e.to_string());
            journal.audit(&format!("{actor} {label} ERROR: {e}"));
        }
    }
}

/// Relay a plain line to everyone but the sender.
fn chat(st: &ServerState, journal: &Journal, sender: SessionId, actor: &str, text: &str) {
    let wire = format!("{actor}: {text}");
    journal.chat(&wire);
    broadcast(&st.registry, &wire, Some(sender));
}

fn whisper(
    st: &ServerState,
    sender: SessionId,
    actor: &str,
    target: &str,
    text: &str,
) -> Result<String, CommandError> {
    let target_id = st
        .directory
        .lookup(target)
        .ok_or_else(|| CommandError::NoSuchUser(target.to_owned()))?;
    if target_id == sender {
        return Err(CommandError::WhisperToSelf);
    }
    let text = text.trim();
    if text.is_empty() {
        return Err(CommandError::EmptyWhisper);
    }

    send_to_id(&st.registry, target_id, &format!("(whisper) {actor}: {text}"));
    send_to_id(
        &st.registry,
        sender,
        &format!("(whisper to {target}) {actor}: {text}"),
    );
    Ok(format!("-> {target}: {text}"))
}

fn rename(
    st: &mut ServerState,
    sender: SessionId,
    actor: &str,
    new_name: &str,
) -> Result<String, CommandError> {
    st.directory.try_rename(actor, new_name)?;
    st.registry.rename(sender, new_name);

    broadcast(
        &st.registry,
        &format!("{actor} is now known as {new_name}"),
        Some(sender),
    );
    send_to_id(
        &st.registry,
        sender,
        &format!("You successfully changed your username to {new_name}"),
    );
    Ok(format!("-> {new_name}"))
}

fn kick(
    st: &mut ServerState,
    journal: &Journal,
    sender: SessionId,
    actor: &str,
    target: &str,
    password: &str,
) -> Result<String, CommandError> {
    let Some(secret) = st.operator_secret.as_deref() else {
        warn!(actor, target, "kick attempted with operator commands disabled");
        return Err(CommandError::OperatorDisabled);
    };
    if !constant_time_eq(secret.as_bytes(), password.as_bytes()) {
        warn!(actor, target, "kick rejected: incorrect admin password");
        return Err(CommandError::WrongPassword);
    }
    let target_id = st
        .directory
        .lookup(target)
        .ok_or_else(|| CommandError::NoSuchUser(target.to_owned()))?;
    if target_id == sender {
        return Err(CommandError::KickSelf);
    }

    if let Some(session) = st.registry.get(target_id) {
        send_to(session, KICK_NOTICE);
        close(session);
    }
    let kicked = lifecycle::disconnect(st, journal, target_id, DisconnectReason::Kicked)
        .unwrap_or_else(|| target.to_owned());
    Ok(format!("-> {kicked}"))
}

fn list_clients(st: &ServerState, sender: SessionId) -> Result<String, CommandError> {
    let names = st.directory.names();
    send_to_id(
        &st.registry,
        sender,
        &format!("Connected clients ({}): {}", names.len(), names.join(", ")),
    );
    Ok(format!("{} users", names.len()))
}

/// Constant-time byte comparison (XOR-based).
///
/// Returns true if and only if `a == b`. Time taken is independent of
/// how many bytes match.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::sync::mpsc;

    use super::*;
    use crate::relay::journal::MemorySink;
    use crate::relay::registry::Outbound;

    const SECRET: &str = "hunter22";

    struct Harness {
        st: ServerState,
        journal: Journal,
        chat: std::sync::Arc<MemorySink>,
        audit: std::sync::Arc<MemorySink>,
    }

    struct Peer {
        id: SessionId,
        rx: mpsc::UnboundedReceiver<Outbound>,
    }

    impl Peer {
        fn take(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(item) = self.rx.try_recv() {
                match item {
                    Outbound::Line(text) => out.push(text),
                    Outbound::Close => out.push("<close>".into()),
                }
            }
            out
        }
    }

    impl Harness {
        fn new() -> Self {
            Self::with_secret(Some(SECRET))
        }

        fn with_secret(secret: Option<&str>) -> Self {
            let (journal, chat, audit) = Journal::in_memory();
            Self {
                st: ServerState::new(secret.map(str::to_owned)),
                journal,
                chat,
                audit,
            }
        }

        fn join(&mut self) -> Peer {
            let addr: SocketAddr = ([127, 0, 0, 1], 6000).into();
            let (tx, rx) = mpsc::unbounded_channel();
            let id = lifecycle::connect(&mut self.st, &self.journal, addr, tx);
            let mut peer = Peer { id, rx };
            peer.take();
            peer
        }

        fn say(&mut self, peer: &Peer, line: &str) {
            handle_line(&mut self.st, &self.journal, peer.id, line);
        }

        fn name_of(&self, peer: &Peer) -> Option<String> {
            self.st.registry.get(peer.id).map(|s| s.name.clone())
        }
    }

    /// Pair of connected peers with their join announcements drained.
    fn two_peers(h: &mut Harness) -> (Peer, Peer) {
        let mut a = h.join();
        let b = h.join();
        a.take();
        (a, b)
    }

    #[test]
    fn chat_reaches_everyone_but_sender() {
        let mut h = Harness::new();
        let (mut a, mut b) = two_peers(&mut h);
        let mut c = h.join();
        a.take();
        b.take();

        h.say(&a, "hello");

        assert!(a.take().is_empty());
        assert_eq!(b.take(), vec!["Guest1: hello"]);
        assert_eq!(c.take(), vec!["Guest1: hello"]);
        assert!(h.chat.records().contains(&"Guest1: hello".to_string()));
        assert!(h.audit.records().is_empty());
    }

    #[test]
    fn chat_from_lone_session_goes_nowhere() {
        let mut h = Harness::new();
        let mut a = h.join();
        h.say(&a, "anyone?");
        assert!(a.take().is_empty());
    }

    #[test]
    fn whisper_reaches_only_target_and_sender() {
        let mut h = Harness::new();
        let (mut a, mut b) = two_peers(&mut h);
        let mut c = h.join();
        a.take();
        b.take();

        h.say(&b, "/w Guest1 hi");

        assert_eq!(a.take(), vec!["(whisper) Guest2: hi"]);
        assert_eq!(b.take(), vec!["(whisper to Guest1) Guest2: hi"]);
        assert!(c.take().is_empty());
        assert_eq!(h.audit.records(), vec!["Guest2 /w OK: -> Guest1: hi"]);
    }

    #[test]
    fn whisper_errors_go_to_sender_only() {
        let mut h = Harness::new();
        let (mut a, mut b) = two_peers(&mut h);

        h.say(&a, "/w Guest1 talking to myself");
        assert_eq!(a.take(), vec!["You cannot whisper to yourself"]);

        h.say(&a, "/w nobody hi");
        assert_eq!(a.take(), vec!["No such user: nobody"]);

        h.say(&a, "/whisper Guest2");
        assert_eq!(a.take(), vec!["Usage: /w <username> <message>"]);

        assert!(b.take().is_empty());
        assert_eq!(
            h.audit.records(),
            vec![
                "Guest1 /w ERROR: You cannot whisper to yourself",
                "Guest1 /w ERROR: No such user: nobody",
                "Guest1 /w ERROR: Usage: /w <username> <message>",
            ]
        );
    }

    #[test]
    fn empty_whisper_is_rejected() {
        let mut h = Harness::new();
        let (mut a, mut b) = two_peers(&mut h);
        let a_name = h.name_of(&a).unwrap();
        let result = whisper(&h.st, a.id, &a_name, "Guest2", "   ");
        assert_eq!(result, Err(CommandError::EmptyWhisper));
        assert!(a.take().is_empty());
        assert!(b.take().is_empty());
    }

    #[test]
    fn rename_announces_and_frees_old_name() {
        let mut h = Harness::new();
        let (mut a, mut b) = two_peers(&mut h);

        h.say(&a, "/username alice");

        assert_eq!(a.take(), vec!["You successfully changed your username to alice"]);
        assert_eq!(b.take(), vec!["Guest1 is now known as alice"]);
        assert_eq!(h.name_of(&a).as_deref(), Some("alice"));
        assert_eq!(h.st.directory.lookup("alice"), Some(a.id));
        assert!(!h.st.directory.is_taken("Guest1"));
        assert_eq!(h.audit.records(), vec!["Guest1 /username OK: -> alice"]);

        // Chat now carries the new name.
        h.say(&a, "hi");
        assert_eq!(b.take(), vec!["alice: hi"]);

        // The old name is immediately claimable.
        h.say(&b, "/username Guest1");
        assert_eq!(b.take(), vec!["You successfully changed your username to Guest1"]);
    }

    #[test]
    fn rename_failures() {
        let mut h = Harness::new();
        let (mut a, mut b) = two_peers(&mut h);

        h.say(&a, "/username no");
        h.say(&a, "/username Guest1");
        h.say(&a, "/username Guest2");
        h.say(&a, "/username two words");
        assert_eq!(
            a.take(),
            vec![
                "Invalid username. Use 3-20 chars: letters, numbers, _ or -",
                "New username must be different from current username",
                "That username is already in use",
                "Usage: /username <newName>",
            ]
        );
        assert!(b.take().is_empty());
        assert_eq!(h.name_of(&a).as_deref(), Some("Guest1"));
    }

    #[test]
    fn kick_with_wrong_password_changes_nothing() {
        let mut h = Harness::new();
        let (mut a, mut b) = two_peers(&mut h);

        h.say(&b, "/kick Guest1 wrongpw");

        assert_eq!(b.take(), vec!["Incorrect admin password"]);
        assert!(a.take().is_empty());
        assert!(h.st.registry.contains(a.id));
        assert!(h.st.directory.is_taken("Guest1"));
        assert_eq!(h.audit.records(), vec!["Guest2 /kick ERROR: Incorrect admin password"]);
    }

    #[test]
    fn kick_closes_target_and_frees_name() {
        let mut h = Harness::new();
        let (mut a, mut b) = two_peers(&mut h);
        let mut c = h.join();
        a.take();
        b.take();

        h.say(&b, &format!("/kick Guest1 {SECRET}"));

        assert_eq!(a.take(), vec![KICK_NOTICE, "<close>"]);
        assert_eq!(b.take(), vec!["Guest1 has left the chat."]);
        assert_eq!(c.take(), vec!["Guest1 has left the chat."]);
        assert!(!h.st.registry.contains(a.id));
        assert!(!h.st.directory.is_taken("Guest1"));
        assert_eq!(h.audit.records(), vec!["Guest2 /kick OK: -> Guest1"]);
        assert!(h.chat.records().contains(&"Guest1 kicked".to_string()));

        // Anything the kicked session still had in flight is dropped.
        h.say(&a, "still here?");
        assert!(b.take().is_empty());
    }

    #[test]
    fn kick_target_checks() {
        let mut h = Harness::new();
        let (mut a, _b) = two_peers(&mut h);

        h.say(&a, &format!("/kick Guest1 {SECRET}"));
        h.say(&a, &format!("/kick ghost {SECRET}"));
        h.say(&a, "/kick Guest2");
        assert_eq!(
            a.take(),
            vec![
                "You cannot kick yourself",
                "No such user: ghost",
                "Usage: /kick <username> <adminPassword>",
            ]
        );
        assert!(h.st.registry.contains(a.id));
    }

    #[test]
    fn kick_disabled_without_secret() {
        let mut h = Harness::with_secret(None);
        let (mut a, _b) = two_peers(&mut h);

        h.say(&a, "/kick Guest2 anything");
        assert_eq!(a.take(), vec!["Operator commands are disabled"]);
        assert_eq!(h.st.registry.len(), 2);
    }

    #[test]
    fn clientlist_is_sorted_with_count() {
        let mut h = Harness::new();
        let (mut a, b) = two_peers(&mut h);
        h.say(&b, "/username zed");
        h.say(&a, "/username amy");
        a.take();

        h.say(&a, "/clientlist");
        assert_eq!(a.take(), vec!["Connected clients (2): amy, zed"]);
        assert!(h
            .audit
            .records()
            .contains(&"amy /clientlist OK: 2 users".to_string()));
    }

    #[test]
    fn unknown_command_replies_to_sender() {
        let mut h = Harness::new();
        let (mut a, mut b) = two_peers(&mut h);

        h.say(&a, "/Dance");

        assert_eq!(a.take(), vec!["Unknown command: /dance"]);
        assert!(b.take().is_empty());
        assert_eq!(
            h.audit.records(),
            vec!["Guest1 /dance ERROR: Unknown command: /dance"]
        );
    }

    #[test]
    fn scenario_from_two_guests() {
        let mut h = Harness::new();
        let (mut a, mut b) = two_peers(&mut h);

        h.say(&a, "hello");
        assert_eq!(b.take(), vec!["Guest1: hello"]);
        assert!(a.take().is_empty());

        h.say(&b, "/w Guest1 hi");
        assert_eq!(a.take(), vec!["(whisper) Guest2: hi"]);
        assert_eq!(b.take(), vec!["(whisper to Guest1) Guest2: hi"]);

        lifecycle::disconnect(&mut h.st, &h.journal, a.id, DisconnectReason::Ended);
        assert_eq!(b.take(), vec!["Guest1 has left the chat."]);

        h.say(&b, "/clientlist");
        assert_eq!(b.take(), vec!["Connected clients (1): Guest2"]);
    }

    #[test]
    fn constant_time_eq_matches_equality() {
        assert!(constant_time_eq(b"hunter22", b"hunter22"));
        assert!(!constant_time_eq(b"hunter22", b"hunter23"));
        assert!(!constant_time_eq(b"hunter2", b"hunter22"));
        assert!(constant_time_eq(b"", b""));
    }
}
