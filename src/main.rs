use clap::{Parser, ValueEnum};
use mermaid_gateway::backend::HttpBackend;
use mermaid_gateway::server::build_gateway;
use mermaid_gateway::transport::http;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    Stdio,
    Tcp,
    Http,
}

#[derive(Parser)]
#[command(name = "mermaid-gateway", version, about = "MCP gateway for a Mermaid diagram service")]
struct Cli {
    /// Transport to serve sessions over.
    #[arg(long, value_enum, default_value_t = TransportKind::Stdio)]
    transport: TransportKind,

    /// Listen address for the tcp and http transports.
    #[arg(long, default_value = "127.0.0.1:8787", env = "MERMAID_GATEWAY_LISTEN")]
    listen: String,

    /// Base URL of the diagram rendering service.
    #[arg(
        long,
        default_value = "http://localhost:3000",
        env = "MERMAID_GATEWAY_BACKEND_URL"
    )]
    backend_url: String,
}

#[tokio::main]
async fn main() -> mermaid_gateway::Result<()> {
    // Logs go to stderr; on the stdio transport stdout belongs to the wire.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let backend = Arc::new(HttpBackend::new(&cli.backend_url));
    let server = Arc::new(build_gateway("mermaid-gateway", backend)?);

    match cli.transport {
        TransportKind::Stdio => server.serve_stdio().await,
        TransportKind::Tcp => server.tcp_listen(&cli.listen).await,
        TransportKind::Http => http::serve(server, &cli.listen).await,
    }
}
