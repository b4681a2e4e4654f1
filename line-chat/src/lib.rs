//! Line-oriented multi-user chat server.
//!
//! Clients connect over TCP, answer a username prompt, and then every plain
//! line they send is relayed to all other participants. The wire protocol is
//! newline-delimited text; see [`protocol`] for the exact line formats.
//!
//! - [`cli`] and [`config`] describe how the binary is started.
//! - [`server`] owns the accept loop and spawns one task per connection.
//! - [`session`] drives a single participant through handshake, message
//!   loop, and one-shot departure.
//! - [`connection`] frames lines on top of the socket halves.
//! - [`registry`] is the shared set of active sessions.
//! - [`broadcast`] fans lines out to a registry snapshot.
//! - [`command`] classifies lines and answers `/users`, `/help` and friends.
//! - [`client`] is a small terminal peer for the same protocol.
//!
//! [`registry::Registry`] and [`broadcast::Broadcaster`] need no sockets, so
//! the fan-out rules can be exercised with plain channels.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
