//! Plain-text line protocol spoken between the server and its peers.
//!
//! Every frame is one UTF-8 line terminated by `\n`. There is no escaping and
//! no length prefix, so bodies never carry a terminator of their own.

use std::{borrow::Cow, fmt};

use crate::session::SessionId;

pub const USERNAME_PROMPT: &str = "Enter your username:";
pub const COMMAND_MARKER: char = '/';
pub const ROSTER_PREFIX: &str = "USERLIST:";
pub const ROSTER_SEPARATOR: char = ',';
pub const HELP_LINE: &str = "HELP: Available commands: /users, /help, /quit";
pub const UNKNOWN_COMMAND_LINE: &str =
    "SERVER: Unknown command. Type /help for available commands.";
pub const SHUTDOWN_LINE: &str = "SERVER: server shutting down";

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Formatting category of a delivered line. Not carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Chat,
    Join,
    Leave,
    RosterUpdate,
    Help,
    Error,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Server,
    Session(SessionId),
}

/// A single outbound line plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub origin: Origin,
    pub kind: MessageKind,
    pub body: String,
}

impl Message {
    fn server(kind: MessageKind, body: String) -> Self {
        Self {
            origin: Origin::Server,
            kind,
            body,
        }
    }

    pub fn chat(origin: SessionId, username: &str, text: &str) -> Self {
        Self {
            origin: Origin::Session(origin),
            kind: MessageKind::Chat,
            body: format!("{username}: {text}"),
        }
    }

    pub fn joined(username: &str) -> Self {
        Self::server(MessageKind::Join, format!("SERVER: {username} joined the chat"))
    }

    pub fn left(username: &str) -> Self {
        Self::server(MessageKind::Leave, format!("SERVER: {username} left the chat"))
    }

    pub fn roster<'a, I>(usernames: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self::server(MessageKind::RosterUpdate, format_roster(usernames))
    }

    pub fn help() -> Self {
        Self::server(MessageKind::Help, HELP_LINE.to_string())
    }

    pub fn unknown_command() -> Self {
        Self::server(MessageKind::Error, UNKNOWN_COMMAND_LINE.to_string())
    }

    pub fn shutdown() -> Self {
        Self::server(MessageKind::Shutdown, SHUTDOWN_LINE.to_string())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.body)
    }
}

/// Renders `USERLIST:a,b,`. The trailing separator is part of the wire
/// format; the reference client drops empty tokens when splitting.
pub fn format_roster<'a, I>(usernames: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut line = String::from(ROSTER_PREFIX);
    for username in usernames {
        line.push_str(username);
        line.push(ROSTER_SEPARATOR);
    }
    line
}

/// Splits a roster line back into usernames, discarding empty tokens.
/// Returns `None` when the line is not a roster line.
pub fn parse_roster(line: &str) -> Option<Vec<String>> {
    let names = line.strip_prefix(ROSTER_PREFIX)?;
    Some(
        names
            .split(ROSTER_SEPARATOR)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

/// Replaces embedded terminators with spaces so a body always fits one frame.
pub fn sanitize(body: &str) -> Cow<'_, str> {
    if body.contains(LINE_ENDINGS) {
        Cow::Owned(body.replace(LINE_ENDINGS, " "))
    } else {
        Cow::Borrowed(body)
    }
}
