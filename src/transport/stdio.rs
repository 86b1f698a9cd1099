use super::framing::LineFramed;
use super::r#trait::NetworkAdapter;
use crate::error::Result;
use async_trait::async_trait;
use tokio::io::{Stdin, Stdout};

/// A `NetworkAdapter` over process stdin/stdout, one message per line.
///
/// Stdout carries protocol messages exclusively; logging must go to stderr.
pub struct StdioAdapter {
    framed: LineFramed<Stdin, Stdout>,
}

impl StdioAdapter {
    pub fn new() -> Self {
        Self {
            framed: LineFramed::new(tokio::io::stdin(), tokio::io::stdout()),
        }
    }
}

impl Default for StdioAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkAdapter for StdioAdapter {
    async fn send(&mut self, msg: &str) -> Result<()> {
        self.framed.send(msg).await
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        self.framed.recv().await
    }
}
