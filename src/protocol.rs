//! The serde boundary between transports and the session core.
//!
//! `ProtocolConnection` sits on top of a `NetworkAdapter` and owns all
//! `serde_json` work for a stream connection, keeping the session logic free
//! of framing and encoding concerns.

use crate::error::Result;
use crate::transport::NetworkAdapter;
use serde::{de::DeserializeOwned, Serialize};

/// A connection that handles protocol-level encoding over a generic
/// `NetworkAdapter`.
pub struct ProtocolConnection<A: NetworkAdapter> {
    adapter: A,
}

impl<A: NetworkAdapter> ProtocolConnection<A> {
    /// Creates a new `ProtocolConnection` over the given adapter.
    pub fn new(adapter: A) -> Self {
        Self { adapter }
    }

    /// Serializes a message into a JSON string and sends it via the adapter.
    pub async fn send_serializable<T: Serialize + Send + Sync>(&mut self, msg: T) -> Result<()> {
        let json_string = serde_json::to_string(&msg)?;
        self.adapter.send(&json_string).await
    }

    /// Sends a raw, already-serialized JSON string over the adapter.
    pub async fn send_raw(&mut self, json_string: &str) -> Result<()> {
        self.adapter.send(json_string).await
    }

    /// Receives one message from the adapter and deserializes it.
    ///
    /// `Ok(None)` means the connection closed gracefully; blank keep-alive
    /// lines are treated the same way.
    pub async fn recv_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.adapter.recv().await? {
            Some(json_string) => {
                if json_string.trim().is_empty() {
                    return Ok(None);
                }
                let msg = serde_json::from_str::<T>(&json_string)?;
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }
}
