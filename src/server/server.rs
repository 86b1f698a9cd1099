//! The `Server` composition root: the immutable pieces every session shares.

use crate::auth::CredentialStore;
use crate::backend::DiagramBackend;
use crate::error::Result;
use crate::prompts::PromptRegistry;
use crate::protocol::ProtocolConnection;
use crate::registry::CapabilityRegistry;
use crate::resources::{BackendResourceProvider, ResourceProvider};
use crate::tools;
use crate::transport::{NetworkAdapter, StdioAdapter, TcpAdapter};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::session::ServerSession;

/// Everything shared across sessions: the capability and prompt catalogs,
/// the resource provider, and the credential store. Read-only once built;
/// each session gets an `Arc` of the whole thing.
pub struct Server {
    pub(crate) name: String,
    pub(crate) registry: CapabilityRegistry,
    pub(crate) prompts: PromptRegistry,
    pub(crate) provider: Arc<dyn ResourceProvider>,
    pub(crate) credentials: Arc<CredentialStore>,
    pub(crate) resource_tick: Duration,
    pub(crate) heartbeat_tick: Duration,
}

impl Server {
    pub fn new(
        name: &str,
        registry: CapabilityRegistry,
        prompts: PromptRegistry,
        provider: Arc<dyn ResourceProvider>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            name: name.to_string(),
            registry,
            prompts,
            provider,
            credentials,
            resource_tick: Duration::from_secs(10),
            heartbeat_tick: Duration::from_secs(60),
        }
    }

    /// Overrides the notification timer intervals. Tests use millisecond
    /// ticks; production keeps the defaults.
    pub fn with_intervals(mut self, resource_tick: Duration, heartbeat_tick: Duration) -> Self {
        self.resource_tick = resource_tick;
        self.heartbeat_tick = heartbeat_tick;
        self
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Runs a single session over an existing stream adapter until the
    /// connection closes.
    pub async fn handle_connection<A>(self: &Arc<Self>, adapter: A) -> Result<()>
    where
        A: NetworkAdapter + Send + 'static,
    {
        let conn = ProtocolConnection::new(adapter);
        let session = ServerSession::new(conn, Arc::clone(self));
        session.run().await
    }

    /// Serves one session over stdin/stdout. Returns when stdin closes.
    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        info!("serving one session over stdio");
        self.handle_connection(StdioAdapter::new()).await
    }

    /// Accepts TCP connections forever, one session per connection.
    pub async fn tcp_listen(self: Arc<Self>, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "listening for stream sessions");

        loop {
            let (stream, client_addr) = listener.accept().await?;
            info!(%client_addr, "accepted connection");
            let server = Arc::clone(&self);

            tokio::spawn(async move {
                let adapter = TcpAdapter::from(stream);
                if let Err(e) = server.handle_connection(adapter).await {
                    error!(%client_addr, error = %e, "session failed");
                }
            });
        }
    }
}

/// Assembles the standard gateway over one backend handle.
///
/// Fails startup if the capability catalog is inconsistent (duplicate
/// names) or an input contract does not compile.
pub fn build_gateway(name: &str, backend: Arc<dyn DiagramBackend>) -> Result<Server> {
    let registry = tools::standard_registry(backend.clone())?;
    Ok(Server::new(
        name,
        registry,
        PromptRegistry::standard(),
        Arc::new(BackendResourceProvider::new(backend)),
        Arc::new(CredentialStore::new()),
    ))
}
