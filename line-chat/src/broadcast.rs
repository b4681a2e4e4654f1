//! Fan-out of server lines to registered sessions.
//!
//! Delivery is a non-blocking enqueue per recipient. A recipient whose queue
//! is full or whose writer is gone is evicted after the pass completes; the
//! remaining recipients are always attempted.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    protocol::Message,
    registry::Registry,
    session::{SessionHandle, SessionId},
};

#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Sends `message` to every active session except `exclude`. Returns how
    /// many sessions accepted it.
    pub fn broadcast(&self, message: &Message, exclude: Option<SessionId>) -> usize {
        let recipients = self.registry.snapshot();
        self.deliver_all(&recipients, message, exclude)
    }

    /// Sends one `USERLIST:` line, built from a single snapshot, to every
    /// active session including whoever triggered it.
    pub fn broadcast_roster(&self) -> usize {
        let recipients = self.registry.snapshot();
        let roster = Message::roster(recipients.iter().map(SessionHandle::username));
        self.deliver_all(&recipients, &roster, None)
    }

    /// Delivers to one session only. A failed delivery evicts it.
    pub fn send_to(&self, session: &SessionHandle, message: &Message) -> bool {
        match session.deliver(&message.body) {
            Ok(()) => true,
            Err(err) => {
                warn!(session = session.id(), %err, kind = ?message.kind, "dropping unreachable client");
                self.depart(session);
                false
            }
        }
    }

    /// Registers a session, announces it to everyone else, and pushes the
    /// new roster to all.
    pub fn join(&self, session: &SessionHandle) -> bool {
        if !self.registry.add(session.clone()) {
            return false;
        }
        self.broadcast(&Message::joined(session.username()), Some(session.id()));
        self.broadcast_roster();
        true
    }

    /// The one-shot departure path. The first caller for a session removes it,
    /// announces the leave to the others, and refreshes the roster; every
    /// caller closes the connection. Returns whether this call did the removal.
    pub fn depart(&self, session: &SessionHandle) -> bool {
        let removed = self.registry.remove(session.id()).is_some();
        session.close();
        if removed {
            self.broadcast(&Message::left(session.username()), Some(session.id()));
            self.broadcast_roster();
        }
        removed
    }

    fn deliver_all(
        &self,
        recipients: &[SessionHandle],
        message: &Message,
        exclude: Option<SessionId>,
    ) -> usize {
        let mut delivered = 0;
        let mut unreachable = Vec::new();

        for session in recipients {
            if Some(session.id()) == exclude {
                continue;
            }
            match session.deliver(&message.body) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(session = session.id(), username = session.username(), %err, "failed to deliver to client");
                    unreachable.push(session.clone());
                }
            }
        }
        debug!(kind = ?message.kind, delivered, failed = unreachable.len(), "broadcast");

        for session in &unreachable {
            self.depart(session);
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::session::SessionState;

    struct Peer {
        handle: SessionHandle,
        inbox: mpsc::Receiver<String>,
    }

    impl Peer {
        fn drain(&mut self) -> Vec<String> {
            let mut lines = Vec::new();
            while let Ok(line) = self.inbox.try_recv() {
                lines.push(line);
            }
            lines
        }
    }

    fn peer(id: SessionId, name: &str, capacity: usize) -> Peer {
        let (tx, inbox) = mpsc::channel(capacity);
        let handle = SessionHandle::new(id, tx, CancellationToken::new());
        handle.assign_username(name.to_string());
        Peer { handle, inbox }
    }

    fn joined(broadcaster: &Broadcaster, peers: &mut [&mut Peer]) {
        for peer in peers.iter() {
            assert!(broadcaster.join(&peer.handle));
        }
        for peer in peers.iter_mut() {
            peer.drain();
        }
    }

    #[test]
    fn join_announces_to_others_and_roster_to_all() {
        let broadcaster = Broadcaster::new(Arc::new(Registry::new()));
        let mut alice = peer(1, "alice", 8);
        let mut bob = peer(2, "bob", 8);

        broadcaster.join(&alice.handle);
        assert_eq!(alice.drain(), ["USERLIST:alice,"]);

        broadcaster.join(&bob.handle);
        assert_eq!(
            alice.drain(),
            ["SERVER: bob joined the chat", "USERLIST:alice,bob,"]
        );
        assert_eq!(bob.drain(), ["USERLIST:alice,bob,"]);
    }

    #[test]
    fn chat_is_not_echoed_to_sender() {
        let broadcaster = Broadcaster::new(Arc::new(Registry::new()));
        let mut alice = peer(1, "alice", 8);
        let mut bob = peer(2, "bob", 8);
        let mut carol = peer(3, "carol", 8);
        joined(&broadcaster, &mut [&mut alice, &mut bob, &mut carol]);

        let delivered = broadcaster.broadcast(&Message::chat(2, "bob", "hello"), Some(2));

        assert_eq!(delivered, 2);
        assert_eq!(alice.drain(), ["bob: hello"]);
        assert_eq!(carol.drain(), ["bob: hello"]);
        assert!(bob.drain().is_empty());
    }

    #[test]
    fn failed_recipient_does_not_block_others() {
        let broadcaster = Broadcaster::new(Arc::new(Registry::new()));
        let mut alice = peer(1, "alice", 8);
        let mut bob = peer(2, "bob", 8);
        let mut carol = peer(3, "carol", 8);
        joined(&broadcaster, &mut [&mut alice, &mut bob, &mut carol]);

        let Peer { handle: bob_handle, inbox } = bob;
        drop(inbox);

        let delivered = broadcaster.broadcast(&Message::chat(1, "alice", "hi"), Some(1));

        assert_eq!(delivered, 1);
        assert_eq!(
            carol.drain(),
            ["alice: hi", "SERVER: bob left the chat", "USERLIST:alice,carol,"]
        );
        assert_eq!(
            alice.drain(),
            ["SERVER: bob left the chat", "USERLIST:alice,carol,"]
        );
        assert_eq!(bob_handle.state(), SessionState::Closed);
        assert!(bob_handle.is_close_requested());
        assert!(!broadcaster.registry().contains(2));
    }

    #[test]
    fn stalled_recipient_is_evicted() {
        let broadcaster = Broadcaster::new(Arc::new(Registry::new()));
        let mut alice = peer(1, "alice", 8);
        let mut slow = peer(2, "slow", 1);
        joined(&broadcaster, &mut [&mut alice, &mut slow]);

        broadcaster.broadcast(&Message::chat(1, "alice", "one"), Some(1));
        broadcaster.broadcast(&Message::chat(1, "alice", "two"), Some(1));

        assert!(!broadcaster.registry().contains(2));
        assert_eq!(slow.drain(), ["alice: one"]);
        assert_eq!(
            alice.drain(),
            ["SERVER: slow left the chat", "USERLIST:alice,"]
        );
    }

    #[test]
    fn depart_runs_once() {
        let broadcaster = Broadcaster::new(Arc::new(Registry::new()));
        let mut alice = peer(1, "alice", 8);
        let mut bob = peer(2, "bob", 8);
        joined(&broadcaster, &mut [&mut alice, &mut bob]);

        assert!(broadcaster.depart(&alice.handle));
        assert!(!broadcaster.depart(&alice.handle));

        assert_eq!(bob.drain(), ["SERVER: alice left the chat", "USERLIST:bob,"]);
        assert!(alice.drain().is_empty());
        assert_eq!(broadcaster.registry().len(), 1);
    }

    #[test]
    fn racing_departures_announce_once() {
        let broadcaster = Broadcaster::new(Arc::new(Registry::new()));
        let mut alice = peer(1, "alice", 8);
        let mut bob = peer(2, "bob", 8);
        joined(&broadcaster, &mut [&mut alice, &mut bob]);

        let barrier = std::sync::Barrier::new(8);
        let removals: usize = std::thread::scope(|scope| {
            let mut workers = Vec::new();
            for _ in 0..8 {
                workers.push(scope.spawn(|| {
                    barrier.wait();
                    broadcaster.depart(&alice.handle)
                }));
            }
            workers
                .into_iter()
                .map(|worker| usize::from(worker.join().unwrap()))
                .sum()
        });

        assert_eq!(removals, 1);
        assert_eq!(bob.drain(), ["SERVER: alice left the chat", "USERLIST:bob,"]);
        assert_eq!(alice.handle.state(), SessionState::Closed);
        assert!(alice.handle.is_close_requested());
        assert_eq!(broadcaster.registry().snapshot().len(), 1);
    }

    #[test]
    fn roster_reaches_everyone() {
        let broadcaster = Broadcaster::new(Arc::new(Registry::new()));
        let mut alice = peer(1, "alice", 8);
        let mut bob = peer(2, "bob", 8);
        joined(&broadcaster, &mut [&mut alice, &mut bob]);

        assert_eq!(broadcaster.broadcast_roster(), 2);
        assert_eq!(alice.drain(), ["USERLIST:alice,bob,"]);
        assert_eq!(bob.drain(), ["USERLIST:alice,bob,"]);
    }

    #[test]
    fn send_to_targets_one_session() {
        let broadcaster = Broadcaster::new(Arc::new(Registry::new()));
        let mut alice = peer(1, "alice", 8);
        let mut bob = peer(2, "bob", 8);
        joined(&broadcaster, &mut [&mut alice, &mut bob]);

        assert!(broadcaster.send_to(&alice.handle, &Message::help()));
        assert_eq!(alice.drain(), [crate::protocol::HELP_LINE]);
        assert!(bob.drain().is_empty());
    }
}
