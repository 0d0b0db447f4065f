//! Fan-out of lines to live sessions.
//!
//! Delivery is best-effort: a session whose writer has already gone away is
//! skipped silently and cleaned up by its own connection task.
use tracing::trace;

use super::registry::{Outbound, Session, SessionId, SessionRegistry};

/// Queue `text` for exactly one session.
pub fn send_to(session: &Session, text: &str) {
    if !session.push(Outbound::Line(text.to_owned())) {
        trace!(session = %session.id, "dropped line for closing session");
    }
}

/// Queue `text` for the session with the given id, if it is still live.
pub fn send_to_id(registry: &SessionRegistry, id: SessionId, text: &str) {
    if let Some(session) = registry.get(id) {
        send_to(session, text);
    }
}

/// Queue `text` for every live session except `exclude`.
pub fn broadcast(registry: &SessionRegistry, text: &str, exclude: Option<SessionId>) {
    for session in registry.all_sessions() {
        if Some(session.id) != exclude {
            send_to(session, text);
        }
    }
}

/// Ask a session's connection to flush and hang up.
pub fn close(session: &Session) {
    let _ = session.push(Outbound::Close);
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::relay::directory::NameDirectory;

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    #[test]
    fn broadcast_skips_excluded_session() {
        let mut dir = NameDirectory::new();
        let mut reg = SessionRegistry::new();
        let addr = ([127, 0, 0, 1], 1).into();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();
        let a = reg.register(&mut dir, addr, tx_a).id;
        reg.register(&mut dir, addr, tx_b);
        reg.register(&mut dir, addr, tx_c);

        broadcast(&reg, "Guest1: hello", Some(a));

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![Outbound::Line("Guest1: hello".into())]);
        assert_eq!(drain(&mut rx_c), vec![Outbound::Line("Guest1: hello".into())]);
    }

    #[test]
    fn broadcast_survives_dead_receiver() {
        let mut dir = NameDirectory::new();
        let mut reg = SessionRegistry::new();
        let addr = ([127, 0, 0, 1], 1).into();
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        reg.register(&mut dir, addr, tx_a);
        reg.register(&mut dir, addr, tx_b);
        drop(rx_a);

        broadcast(&reg, "notice", None);

        assert_eq!(drain(&mut rx_b), vec![Outbound::Line("notice".into())]);
    }

    #[test]
    fn close_follows_queued_lines() {
        let mut dir = NameDirectory::new();
        let mut reg = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = reg.register(&mut dir, ([127, 0, 0, 1], 1).into(), tx).id;

        send_to_id(&reg, id, "bye");
        close(reg.get(id).unwrap());

        assert_eq!(
            drain(&mut rx),
            vec![Outbound::Line("bye".into()), Outbound::Close]
        );
    }
}
