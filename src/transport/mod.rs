//! Transport adapters that ferry protocol messages to and from sessions.
//!
//! Stream transports (stdio, TCP) implement [`NetworkAdapter`] and map one
//! connection to one session. The HTTP transport maps header-addressed
//! requests onto per-session tasks instead; see [`http`].

pub mod framing;
pub mod http;
pub mod stdio;
pub mod tcp;
pub mod r#trait;

pub use r#trait::NetworkAdapter;
pub use stdio::StdioAdapter;
pub use tcp::TcpAdapter;
