//! A protocol gateway in front of a remote Mermaid diagram service.
//!
//! The gateway speaks an MCP-shaped JSON-RPC dialect over stdio, TCP, or
//! HTTP, exposing the diagram service as tools, template-addressed
//! resources, and prompts. Each connection (or HTTP session header) gets an
//! isolated session with its own credential binding, subscriptions, and log
//! threshold; the capability catalog and credential store are the only state
//! shared across sessions.
//!
//! Typical embedding:
//!
//! ```no_run
//! use mermaid_gateway::backend::HttpBackend;
//! use mermaid_gateway::server::build_gateway;
//! use std::sync::Arc;
//!
//! # async fn run() -> mermaid_gateway::Result<()> {
//! let backend = Arc::new(HttpBackend::new("http://localhost:3000"));
//! let server = Arc::new(build_gateway("mermaid-gateway", backend)?);
//! server.serve_stdio().await
//! # }
//! ```

pub mod auth;
pub mod backend;
pub mod error;
pub mod prompts;
pub mod protocol;
pub mod registry;
pub mod resources;
pub mod scheduler;
pub mod server;
pub mod tools;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use server::{build_gateway, Server};
