//! Prompt templates and argument completion.
//!
//! Templates are versionless, looked up by name only, and immutable after
//! construction. Rendering substitutes argument values into message text;
//! the review template embeds a resource reference the caller dereferences
//! later via `resources/read`.

use crate::error::{Error, Result};
use crate::types::{Content, GetPromptResult, Prompt, PromptArgument, PromptMessage};
use std::collections::HashMap;

type RenderFn = fn(&HashMap<String, String>) -> Vec<PromptMessage>;

struct PromptTemplate {
    descriptor: Prompt,
    render: RenderFn,
}

/// Immutable catalog of prompt templates.
pub struct PromptRegistry {
    templates: Vec<PromptTemplate>,
}

impl PromptRegistry {
    /// The gateway's built-in templates.
    pub fn standard() -> Self {
        Self {
            templates: vec![
                PromptTemplate {
                    descriptor: Prompt {
                        name: "flowchart".to_string(),
                        description: Some(
                            "Draft a Mermaid flowchart from a plain-language description"
                                .to_string(),
                        ),
                        arguments: Some(vec![
                            PromptArgument {
                                name: "description".to_string(),
                                description: Some(
                                    "What the flowchart should show".to_string(),
                                ),
                                required: Some(true),
                            },
                            PromptArgument {
                                name: "direction".to_string(),
                                description: Some(
                                    "Flow direction (TB, TD, BT, RL, or LR)".to_string(),
                                ),
                                required: Some(false),
                            },
                        ]),
                    },
                    render: render_flowchart,
                },
                PromptTemplate {
                    descriptor: Prompt {
                        name: "review-diagram".to_string(),
                        description: Some(
                            "Review a stored diagram for clarity and correctness".to_string(),
                        ),
                        arguments: Some(vec![
                            PromptArgument {
                                name: "id".to_string(),
                                description: Some("Id of the stored diagram".to_string()),
                                required: Some(true),
                            },
                            PromptArgument {
                                name: "format".to_string(),
                                description: Some(
                                    "Rendering to review (svg, png, or pdf)".to_string(),
                                ),
                                required: Some(false),
                            },
                        ]),
                    },
                    render: render_review,
                },
            ],
        }
    }

    pub fn list(&self) -> Vec<Prompt> {
        self.templates.iter().map(|t| t.descriptor.clone()).collect()
    }

    /// Looks up a template by name and renders it.
    ///
    /// Unknown names and missing required arguments are protocol faults.
    pub fn get(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResult> {
        let template = self
            .templates
            .iter()
            .find(|t| t.descriptor.name == name)
            .ok_or_else(|| Error::PromptNotFound(name.to_string()))?;

        let arguments = arguments.unwrap_or_default();
        for declared in template.descriptor.arguments.iter().flatten() {
            if declared.required == Some(true) && !arguments.contains_key(&declared.name) {
                return Err(Error::InvalidParams(format!(
                    "prompt '{name}' requires argument '{}'",
                    declared.name
                )));
            }
        }

        Ok(GetPromptResult {
            description: template.descriptor.description.clone(),
            messages: (template.render)(&arguments),
        })
    }
}

fn render_flowchart(args: &HashMap<String, String>) -> Vec<PromptMessage> {
    let description = args.get("description").map(String::as_str).unwrap_or("");
    let direction = args.get("direction").map(String::as_str).unwrap_or("TD");
    vec![PromptMessage {
        role: "user".to_string(),
        content: Content::Text {
            text: format!(
                "Write a Mermaid flowchart (direction {direction}) that shows: \
                 {description}. Respond with the Mermaid source only."
            ),
        },
    }]
}

fn render_review(args: &HashMap<String, String>) -> Vec<PromptMessage> {
    let id = args.get("id").map(String::as_str).unwrap_or("");
    let format = args.get("format").map(String::as_str).unwrap_or("svg");
    vec![PromptMessage {
        role: "user".to_string(),
        content: Content::ResourceLink {
            uri: format!("diagram://{id}/{format}"),
            name: "diagram under review".to_string(),
            description: Some(
                "Read this resource, then review the diagram for clarity, \
                 layout, and correctness."
                    .to_string(),
            ),
            mime_type: None,
        },
    }]
}

/// Fixed completion candidates per argument name.
///
/// Returns candidates starting with `partial`, preserving candidate order.
/// An unrecognized argument name yields an empty list, never an error.
pub fn complete(argument: &str, partial: &str) -> Vec<String> {
    let candidates: &[&str] = match argument {
        "direction" => &["TB", "TD", "BT", "RL", "LR"],
        "format" => &["svg", "png", "pdf"],
        "theme" => &["default", "dark", "forest", "neutral"],
        _ => &[],
    };
    candidates
        .iter()
        .filter(|c| c.starts_with(partial))
        .map(|c| c.to_string())
        .collect()
}
