use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server, accepting TCP connections.
    Serve(ServeArgs),
    /// Connect to a server from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:12345")]
    pub listen: SocketAddr,

    /// Lines buffered per client before it is dropped as stalled.
    #[arg(long, default_value_t = crate::config::DEFAULT_OUTBOUND_CAPACITY)]
    pub outbound_capacity: usize,

    /// Longest accepted client line, in bytes.
    #[arg(long, default_value_t = crate::config::DEFAULT_MAX_LINE_LEN)]
    pub max_line_len: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Username sent in reply to the server's prompt.
    #[arg(long)]
    pub username: String,

    /// Address of the server to connect to.
    #[arg(long, default_value = "127.0.0.1:12345")]
    pub server: SocketAddr,
}
