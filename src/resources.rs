//! Template-addressed resources and the provider boundary.
//!
//! Readable resources follow the `diagram://{id}/{format}` scheme. The
//! session core validates URI shape here before anything is delegated
//! downstream: malformed URIs fail fast with a protocol fault, and a
//! provider miss on a well-formed URI becomes a resource-not-found error.

use crate::backend::{DiagramBackend, RenderFormat, Rendered};
use crate::error::{Error, Result};
use crate::types::{BlobResourceContents, ResourceContents, ResourceTemplate, TextResourceContents};
use async_trait::async_trait;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

pub const DIAGRAM_SCHEME: &str = "diagram";

/// Stored diagram ids are backend-issued UUIDs; anything else in the id slot
/// is a caller mistake, rejected before the backend ever sees it.
static DIAGRAM_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("diagram id pattern compiles")
});

/// A parsed, shape-validated `diagram://{id}/{format}` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramUri {
    pub id: String,
    pub format: RenderFormat,
}

impl DiagramUri {
    /// Parses and validates a resource URI.
    ///
    /// Checks, in order: scheme, parameter count, id shape, format name.
    /// Every failure is a descriptive protocol fault.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("diagram://")
            .ok_or_else(|| Error::InvalidParams(format!(
                "unsupported resource URI '{uri}': expected scheme '{DIAGRAM_SCHEME}://'"
            )))?;

        let segments: Vec<&str> = rest.split('/').collect();
        let [id, format] = segments.as_slice() else {
            return Err(Error::InvalidParams(format!(
                "malformed resource URI '{uri}': expected diagram://{{id}}/{{format}}"
            )));
        };

        if !DIAGRAM_ID_RE.is_match(id) {
            return Err(Error::InvalidParams(format!(
                "malformed resource URI '{uri}': '{id}' is not a diagram id"
            )));
        }

        let format: RenderFormat = format.parse().map_err(|_| {
            Error::InvalidParams(format!(
                "malformed resource URI '{uri}': format must be one of svg, png, pdf"
            ))
        })?;

        Ok(Self {
            id: id.to_string(),
            format,
        })
    }
}

impl fmt::Display for DiagramUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "diagram://{}/{}", self.id, self.format)
    }
}

/// The URI templates a session can read under, advertised via
/// `resources/templates/list`.
pub fn resource_templates() -> Vec<ResourceTemplate> {
    vec![ResourceTemplate {
        uri_template: "diagram://{id}/{format}".to_string(),
        name: "Stored diagram".to_string(),
        description: Some(
            "A diagram stored on the backend, rendered to svg, png, or pdf".to_string(),
        ),
        mime_type: None,
    }]
}

/// Produces the content behind an already shape-validated URI.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn read(&self, uri: &DiagramUri) -> Result<Rendered>;
}

/// `ResourceProvider` backed by the remote diagram service.
pub struct BackendResourceProvider {
    backend: Arc<dyn DiagramBackend>,
}

impl BackendResourceProvider {
    pub fn new(backend: Arc<dyn DiagramBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ResourceProvider for BackendResourceProvider {
    async fn read(&self, uri: &DiagramUri) -> Result<Rendered> {
        // A miss on a well-formed URI is a caller mistake, so unlike tool
        // handlers the failure crosses the wire as a protocol-level error.
        self.backend
            .fetch(&uri.id, uri.format)
            .await
            .map_err(|e| Error::ResourceNotFound(format!("{uri}: {e}")))
    }
}

/// Wraps provider output into wire-shaped resource contents: textual MIME
/// types stay text, everything else is base64.
pub fn rendered_to_contents(uri: &DiagramUri, rendered: Rendered) -> ResourceContents {
    let textual = rendered.mime_type.starts_with("text/")
        || rendered.mime_type.starts_with("image/svg");
    if textual {
        ResourceContents::Text(TextResourceContents {
            uri: uri.to_string(),
            mime_type: Some(rendered.mime_type),
            text: String::from_utf8_lossy(&rendered.bytes).into_owned(),
        })
    } else {
        ResourceContents::Blob(BlobResourceContents {
            uri: uri.to_string(),
            mime_type: Some(rendered.mime_type),
            blob: base64::engine::general_purpose::STANDARD.encode(&rendered.bytes),
        })
    }
}
