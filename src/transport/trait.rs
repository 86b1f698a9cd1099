// src/transport/trait.rs
use crate::error::Result;
use async_trait::async_trait;

/// A generic, message-based stream transport.
///
/// Implementations frame whole JSON messages; the protocol layer above never
/// sees partial reads. `recv` returns `Ok(None)` when the peer closes the
/// connection gracefully.
#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    async fn send(&mut self, msg: &str) -> Result<()>;
    async fn recv(&mut self) -> Result<Option<String>>;
}
