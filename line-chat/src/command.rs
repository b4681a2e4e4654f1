//! Classification of inbound lines and handling of `/` commands.

use tracing::debug;

use crate::{
    broadcast::Broadcaster,
    protocol::{COMMAND_MARKER, Message},
    session::SessionHandle,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Users,
    Help,
    Unknown(String),
}

/// What a single client line asks the server to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input<'a> {
    Quit,
    Command(Command),
    Chat(&'a str),
}

impl<'a> Input<'a> {
    /// Commands match the whole line, ignoring ASCII case.
    pub fn classify(line: &'a str) -> Self {
        if !line.starts_with(COMMAND_MARKER) {
            return Input::Chat(line);
        }
        if line.eq_ignore_ascii_case("/quit") {
            Input::Quit
        } else if line.eq_ignore_ascii_case("/users") {
            Input::Command(Command::Users)
        } else if line.eq_ignore_ascii_case("/help") {
            Input::Command(Command::Help)
        } else {
            Input::Command(Command::Unknown(line.to_string()))
        }
    }
}

pub struct CommandRouter {
    broadcaster: Broadcaster,
}

impl CommandRouter {
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self { broadcaster }
    }

    /// Only `/users` reaches other sessions; everything else answers the
    /// issuer alone.
    pub fn dispatch(&self, session: &SessionHandle, command: &Command) {
        match command {
            Command::Users => {
                self.broadcaster.broadcast_roster();
            }
            Command::Help => {
                self.broadcaster.send_to(session, &Message::help());
            }
            Command::Unknown(line) => {
                debug!(session = session.id(), command = %line, "unknown command");
                self.broadcaster.send_to(session, &Message::unknown_command());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        protocol::{HELP_LINE, UNKNOWN_COMMAND_LINE},
        registry::Registry,
        session::SessionId,
    };

    #[test]
    fn classifies_lines() {
        assert_eq!(Input::classify("/QUIT"), Input::Quit);
        assert_eq!(Input::classify("/Users"), Input::Command(Command::Users));
        assert_eq!(Input::classify("/help"), Input::Command(Command::Help));
        assert_eq!(
            Input::classify("/quit now"),
            Input::Command(Command::Unknown("/quit now".into()))
        );
        assert_eq!(Input::classify("hello /users"), Input::Chat("hello /users"));
        assert_eq!(Input::classify(""), Input::Chat(""));
    }

    fn member(
        broadcaster: &Broadcaster,
        id: SessionId,
        name: &str,
    ) -> (SessionHandle, mpsc::Receiver<String>) {
        let (tx, mut rx) = mpsc::channel(8);
        let handle = SessionHandle::new(id, tx, CancellationToken::new());
        handle.assign_username(name.to_string());
        assert!(broadcaster.join(&handle));
        while rx.try_recv().is_ok() {}
        (handle, rx)
    }

    #[test]
    fn help_and_unknown_answer_only_the_issuer() {
        let broadcaster = Broadcaster::new(Arc::new(Registry::new()));
        let (alice, mut alice_rx) = member(&broadcaster, 1, "alice");
        let (_bob, mut bob_rx) = member(&broadcaster, 2, "bob");
        while alice_rx.try_recv().is_ok() {}
        let router = CommandRouter::new(broadcaster);

        router.dispatch(&alice, &Command::Help);
        router.dispatch(&alice, &Command::Unknown("/dance".into()));

        assert_eq!(alice_rx.try_recv().unwrap(), HELP_LINE);
        assert_eq!(alice_rx.try_recv().unwrap(), UNKNOWN_COMMAND_LINE);
        assert!(bob_rx.try_recv().is_err());
    }

    #[test]
    fn users_refreshes_everyone() {
        let broadcaster = Broadcaster::new(Arc::new(Registry::new()));
        let (alice, mut alice_rx) = member(&broadcaster, 1, "alice");
        let (_bob, mut bob_rx) = member(&broadcaster, 2, "bob");
        while alice_rx.try_recv().is_ok() {}
        let router = CommandRouter::new(broadcaster);

        router.dispatch(&alice, &Command::Users);

        assert_eq!(alice_rx.try_recv().unwrap(), "USERLIST:alice,bob,");
        assert_eq!(bob_rx.try_recv().unwrap(), "USERLIST:alice,bob,");
    }
}
