use std::net::{Ipv4Addr, SocketAddr};

use crate::cli::ServeArgs;

pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;
pub const DEFAULT_MAX_LINE_LEN: usize = 8192;

/// Server settings, filled from `serve` flags or [`Default`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Lines queued per session before the peer counts as stalled.
    pub outbound_capacity: usize,
    /// Longest accepted inbound line in bytes, terminator excluded.
    pub max_line_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            listen: args.listen,
            outbound_capacity: args.outbound_capacity.max(1),
            max_line_len: args.max_line_len.max(1),
        }
    }
}
