//! The remote diagram service boundary.
//!
//! The session core treats the backend as an opaque collaborator: thin HTTP
//! wrappers that either produce a structured payload or fail with
//! [`Error::Downstream`]. Nothing here inspects diagram semantics.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Output formats the rendering service supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderFormat {
    Svg,
    Png,
    Pdf,
}

impl RenderFormat {
    pub const ALL: [RenderFormat; 3] = [RenderFormat::Svg, RenderFormat::Png, RenderFormat::Pdf];

    pub fn mime_type(&self) -> &'static str {
        match self {
            RenderFormat::Svg => "image/svg+xml",
            RenderFormat::Png => "image/png",
            RenderFormat::Pdf => "application/pdf",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RenderFormat::Svg => "svg",
            RenderFormat::Png => "png",
            RenderFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for RenderFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "svg" => Ok(RenderFormat::Svg),
            "png" => Ok(RenderFormat::Png),
            "pdf" => Ok(RenderFormat::Pdf),
            other => Err(Error::InvalidParams(format!("unknown format '{other}'"))),
        }
    }
}

/// A rendered diagram payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// A diagram document stored on the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedDiagram {
    pub id: String,
    pub title: String,
}

/// Contract the core needs from the remote diagram service.
#[async_trait]
pub trait DiagramBackend: Send + Sync {
    /// Renders Mermaid source to the requested format.
    async fn render(
        &self,
        source: &str,
        format: RenderFormat,
        theme: Option<&str>,
    ) -> Result<Rendered>;

    /// Stores a diagram under the caller's account. Requires a credential.
    async fn save(&self, source: &str, title: &str, token: &str) -> Result<SavedDiagram>;

    /// Lists the caller's stored diagrams. Requires a credential.
    async fn list(&self, token: &str) -> Result<Vec<SavedDiagram>>;

    /// Fetches a stored diagram rendered to the requested format.
    async fn fetch(&self, id: &str, format: RenderFormat) -> Result<Rendered>;
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    code: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    theme: Option<&'a str>,
}

#[derive(Serialize)]
struct SaveRequest<'a> {
    code: &'a str,
    title: &'a str,
}

/// `DiagramBackend` over plain HTTP.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Downstream(format!(
            "backend returned {status}: {body}"
        )))
    }

    async fn read_rendered(response: reqwest::Response, fallback: RenderFormat) -> Result<Rendered> {
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(fallback.mime_type())
            .to_string();
        let bytes = response.bytes().await?.to_vec();
        Ok(Rendered { bytes, mime_type })
    }
}

#[async_trait]
impl DiagramBackend for HttpBackend {
    async fn render(
        &self,
        source: &str,
        format: RenderFormat,
        theme: Option<&str>,
    ) -> Result<Rendered> {
        let response = self
            .client
            .post(format!("{}/render", self.base_url))
            .json(&RenderRequest {
                code: source,
                format: format.as_str(),
                theme,
            })
            .send()
            .await?;
        let response = Self::expect_success(response).await?;
        Self::read_rendered(response, format).await
    }

    async fn save(&self, source: &str, title: &str, token: &str) -> Result<SavedDiagram> {
        let response = self
            .client
            .post(format!("{}/documents", self.base_url))
            .bearer_auth(token)
            .json(&SaveRequest {
                code: source,
                title,
            })
            .send()
            .await?;
        let response = Self::expect_success(response).await?;
        Ok(response.json().await?)
    }

    async fn list(&self, token: &str) -> Result<Vec<SavedDiagram>> {
        let response = self
            .client
            .get(format!("{}/documents", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        let response = Self::expect_success(response).await?;
        Ok(response.json().await?)
    }

    async fn fetch(&self, id: &str, format: RenderFormat) -> Result<Rendered> {
        let response = self
            .client
            .get(format!("{}/documents/{id}", self.base_url))
            .query(&[("format", format.as_str())])
            .send()
            .await?;
        let response = Self::expect_success(response).await?;
        Self::read_rendered(response, format).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn render_returns_bytes_and_mime_type() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/render")
            .with_status(200)
            .with_header("content-type", "image/svg+xml")
            .with_body("<svg/>")
            .create_async()
            .await;

        let backend = HttpBackend::new(server.url());
        let rendered = backend
            .render("graph TD; A-->B", RenderFormat::Svg, None)
            .await
            .unwrap();

        assert_eq!(rendered.mime_type, "image/svg+xml");
        assert_eq!(rendered.bytes, b"<svg/>");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_downstream_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/render")
            .with_status(422)
            .with_body("syntax error at line 2")
            .create_async()
            .await;

        let backend = HttpBackend::new(server.url());
        let err = backend
            .render("graph TD; A-->", RenderFormat::Png, None)
            .await
            .unwrap_err();

        match err {
            Error::Downstream(msg) => assert!(msg.contains("syntax error")),
            other => panic!("expected downstream failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn save_sends_bearer_token_and_parses_document() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/documents")
            .match_header("authorization", "Bearer secret-token")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"d290f1ee-6c54-4b01-90e6-d701748f0851","title":"Flow"}"#)
            .create_async()
            .await;

        let backend = HttpBackend::new(server.url());
        let saved = backend
            .save("graph TD; A-->B", "Flow", "secret-token")
            .await
            .unwrap();

        assert_eq!(saved.id, "d290f1ee-6c54-4b01-90e6-d701748f0851");
        assert_eq!(saved.title, "Flow");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_passes_format_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/documents/abc")
            .match_query(mockito::Matcher::UrlEncoded(
                "format".into(),
                "png".into(),
            ))
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(vec![137, 80, 78, 71])
            .create_async()
            .await;

        let backend = HttpBackend::new(server.url());
        let rendered = backend.fetch("abc", RenderFormat::Png).await.unwrap();
        assert_eq!(rendered.mime_type, "image/png");
        mock.assert_async().await;
    }

    #[test]
    fn format_parse_rejects_unknown() {
        assert_eq!("svg".parse::<RenderFormat>().unwrap(), RenderFormat::Svg);
        assert!("bmp".parse::<RenderFormat>().is_err());
    }
}
