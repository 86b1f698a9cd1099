//! The gateway server: composition root plus per-session protocol core.

mod server;
pub mod session;

pub use server::{build_gateway, Server};
pub use session::{ServerSession, SessionCore, SessionState};
