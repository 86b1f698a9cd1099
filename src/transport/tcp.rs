use super::framing::LineFramed;
use super::r#trait::NetworkAdapter;
use crate::error::Result;
use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A `NetworkAdapter` over a TCP stream, one message per line.
pub struct TcpAdapter {
    framed: LineFramed<OwnedReadHalf, OwnedWriteHalf>,
}

impl TcpAdapter {
    /// Creates a new `TcpAdapter` by connecting to a given address.
    pub async fn connect(addr: &str) -> Result<Self> {
        Ok(Self::from(TcpStream::connect(addr).await?))
    }
}

impl From<TcpStream> for TcpAdapter {
    fn from(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            framed: LineFramed::new(read_half, write_half),
        }
    }
}

#[async_trait]
impl NetworkAdapter for TcpAdapter {
    async fn send(&mut self, msg: &str) -> Result<()> {
        self.framed.send(msg).await
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        self.framed.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::task;

    /// Tests a full send/receive round-trip over a real TCP connection.
    #[tokio::test]
    async fn test_tcp_adapter_send_recv_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_handle = task::spawn(async move {
            let (server_stream, _) = listener.accept().await.unwrap();
            let mut server_adapter = TcpAdapter::from(server_stream);

            let received = server_adapter.recv().await.unwrap().unwrap();
            assert_eq!(received, "hello from client");

            server_adapter.send("hello from server").await.unwrap();
        });

        let client_handle = task::spawn(async move {
            let mut client_adapter = TcpAdapter::connect(&addr.to_string()).await.unwrap();

            client_adapter.send("hello from client").await.unwrap();

            let received = client_adapter.recv().await.unwrap().unwrap();
            assert_eq!(received, "hello from server");
        });

        server_handle.await.unwrap();
        client_handle.await.unwrap();
    }
}
