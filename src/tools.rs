//! The gateway's built-in capabilities.
//!
//! Each capability is one type implementing [`Capability`], stateless apart
//! from a shared backend handle. Input contracts are declared as JSON
//! Schemas; by the time `execute` runs the arguments have already passed
//! validation, so deserialization failures here would be registry bugs and
//! are reported as invalid-params faults just in case.

use crate::backend::{DiagramBackend, RenderFormat};
use crate::error::{Error, Result};
use crate::registry::{Capability, CapabilityRegistry};
use crate::types::{CallToolResult, Content, ToolAnnotations};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Builds the standard registry over one backend handle. Fails startup if
/// the catalog is internally inconsistent (duplicate names).
pub fn standard_registry(backend: Arc<dyn DiagramBackend>) -> Result<CapabilityRegistry> {
    CapabilityRegistry::build(vec![
        Arc::new(RenderDiagramTool {
            backend: backend.clone(),
        }),
        Arc::new(SaveDiagramTool {
            backend: backend.clone(),
        }),
        Arc::new(ListDiagramsTool { backend }),
    ])
}

fn parse_args<T: for<'de> Deserialize<'de>>(name: &str, arguments: Value) -> Result<T> {
    serde_json::from_value(arguments)
        .map_err(|e| Error::InvalidParams(format!("arguments for '{name}': {e}")))
}

// --- render-diagram ---

pub struct RenderDiagramTool {
    backend: Arc<dyn DiagramBackend>,
}

#[derive(Deserialize)]
struct RenderArgs {
    code: String,
    format: Option<RenderFormat>,
    theme: Option<String>,
}

#[async_trait]
impl Capability for RenderDiagramTool {
    fn name(&self) -> &str {
        "render-diagram"
    }

    fn description(&self) -> &str {
        "Render Mermaid source to an image (svg, png, or pdf)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Mermaid diagram source"
                },
                "format": {
                    "type": "string",
                    "enum": ["svg", "png", "pdf"],
                    "description": "Output format, defaults to svg"
                },
                "theme": {
                    "type": "string",
                    "enum": ["default", "dark", "forest", "neutral"],
                    "description": "Rendering theme"
                }
            },
            "required": ["code"],
            "additionalProperties": false
        })
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        Some(ToolAnnotations {
            read_only_hint: Some(true),
            ..Default::default()
        })
    }

    async fn execute(
        &self,
        arguments: Value,
        _credential: Option<&str>,
    ) -> Result<CallToolResult> {
        let args: RenderArgs = parse_args(self.name(), arguments)?;
        let format = args.format.unwrap_or(RenderFormat::Svg);
        let rendered = self
            .backend
            .render(&args.code, format, args.theme.as_deref())
            .await?;

        let content = if format == RenderFormat::Svg {
            Content::Text {
                text: String::from_utf8_lossy(&rendered.bytes).into_owned(),
            }
        } else {
            Content::Image {
                data: base64::engine::general_purpose::STANDARD.encode(&rendered.bytes),
                mime_type: rendered.mime_type,
            }
        };
        Ok(CallToolResult {
            content: vec![content],
            is_error: false,
        })
    }
}

// --- save-diagram ---

pub struct SaveDiagramTool {
    backend: Arc<dyn DiagramBackend>,
}

#[derive(Deserialize)]
struct SaveArgs {
    code: String,
    title: String,
}

#[async_trait]
impl Capability for SaveDiagramTool {
    fn name(&self) -> &str {
        "save-diagram"
    }

    fn description(&self) -> &str {
        "Store a Mermaid diagram under the caller's account"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Mermaid diagram source"
                },
                "title": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Title for the stored diagram"
                }
            },
            "required": ["code", "title"],
            "additionalProperties": false
        })
    }

    fn requires_credential(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        arguments: Value,
        credential: Option<&str>,
    ) -> Result<CallToolResult> {
        let args: SaveArgs = parse_args(self.name(), arguments)?;
        // The registry guarantees a credential is present for this tool.
        let token = credential.ok_or_else(|| Error::MissingCredential(self.name().to_string()))?;
        let saved = self.backend.save(&args.code, &args.title, token).await?;
        Ok(CallToolResult {
            content: vec![
                Content::Text {
                    text: format!("Saved '{}' as {}", saved.title, saved.id),
                },
                Content::ResourceLink {
                    uri: format!("diagram://{}/svg", saved.id),
                    name: saved.title,
                    description: None,
                    mime_type: Some(RenderFormat::Svg.mime_type().to_string()),
                },
            ],
            is_error: false,
        })
    }
}

// --- list-diagrams ---

pub struct ListDiagramsTool {
    backend: Arc<dyn DiagramBackend>,
}

#[async_trait]
impl Capability for ListDiagramsTool {
    fn name(&self) -> &str {
        "list-diagrams"
    }

    fn description(&self) -> &str {
        "List the diagrams stored under the caller's account"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    fn requires_credential(&self) -> bool {
        true
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        Some(ToolAnnotations {
            read_only_hint: Some(true),
            ..Default::default()
        })
    }

    async fn execute(
        &self,
        _arguments: Value,
        credential: Option<&str>,
    ) -> Result<CallToolResult> {
        let token = credential.ok_or_else(|| Error::MissingCredential(self.name().to_string()))?;
        let diagrams = self.backend.list(token).await?;
        if diagrams.is_empty() {
            return Ok(CallToolResult::text("No stored diagrams."));
        }
        let listing = diagrams
            .iter()
            .map(|d| format!("{}  {}", d.id, d.title))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(CallToolResult::text(listing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Rendered, SavedDiagram};

    struct FakeBackend;

    #[async_trait]
    impl DiagramBackend for FakeBackend {
        async fn render(
            &self,
            source: &str,
            format: RenderFormat,
            _theme: Option<&str>,
        ) -> Result<Rendered> {
            Ok(Rendered {
                bytes: match format {
                    RenderFormat::Svg => format!("<svg><!-- {source} --></svg>").into_bytes(),
                    _ => vec![0xde, 0xad],
                },
                mime_type: format.mime_type().to_string(),
            })
        }

        async fn save(&self, _source: &str, title: &str, _token: &str) -> Result<SavedDiagram> {
            Ok(SavedDiagram {
                id: "d290f1ee-6c54-4b01-90e6-d701748f0851".to_string(),
                title: title.to_string(),
            })
        }

        async fn list(&self, _token: &str) -> Result<Vec<SavedDiagram>> {
            Ok(vec![SavedDiagram {
                id: "d290f1ee-6c54-4b01-90e6-d701748f0851".to_string(),
                title: "Flow".to_string(),
            }])
        }

        async fn fetch(&self, _id: &str, format: RenderFormat) -> Result<Rendered> {
            Ok(Rendered {
                bytes: b"<svg/>".to_vec(),
                mime_type: format.mime_type().to_string(),
            })
        }
    }

    #[tokio::test]
    async fn render_svg_comes_back_as_text() {
        let tool = RenderDiagramTool {
            backend: Arc::new(FakeBackend),
        };
        let result = tool
            .execute(json!({ "code": "graph TD; A-->B" }), None)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(matches!(
            &result.content[0],
            Content::Text { text } if text.contains("graph TD; A-->B")
        ));
    }

    #[tokio::test]
    async fn render_png_comes_back_as_base64_image() {
        let tool = RenderDiagramTool {
            backend: Arc::new(FakeBackend),
        };
        let result = tool
            .execute(json!({ "code": "graph TD", "format": "png" }), None)
            .await
            .unwrap();
        match &result.content[0] {
            Content::Image { data, mime_type } => {
                assert_eq!(mime_type, "image/png");
                assert_eq!(
                    base64::engine::general_purpose::STANDARD
                        .decode(data)
                        .unwrap(),
                    vec![0xde, 0xad]
                );
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn save_returns_a_resource_link() {
        let tool = SaveDiagramTool {
            backend: Arc::new(FakeBackend),
        };
        let result = tool
            .execute(json!({ "code": "graph TD", "title": "Flow" }), Some("tok"))
            .await
            .unwrap();
        assert!(result
            .content
            .iter()
            .any(|c| matches!(c, Content::ResourceLink { uri, .. }
                if uri == "diagram://d290f1ee-6c54-4b01-90e6-d701748f0851/svg")));
    }

    #[tokio::test]
    async fn list_formats_one_line_per_diagram() {
        let tool = ListDiagramsTool {
            backend: Arc::new(FakeBackend),
        };
        let result = tool.execute(json!({}), Some("tok")).await.unwrap();
        assert!(matches!(
            &result.content[0],
            Content::Text { text } if text.contains("Flow")
        ));
    }

    #[test]
    fn standard_registry_builds_with_unique_names() {
        let registry = standard_registry(Arc::new(FakeBackend)).unwrap();
        assert_eq!(registry.len(), 3);
    }
}
