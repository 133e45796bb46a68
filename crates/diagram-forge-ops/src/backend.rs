//! The generation backend contract and its HTTP client.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use diagram_forge_core::wire::{
    DiagramConfigResponse, DiagramPayload, GenerationRequest, InstructionsRequest,
    InstructionsResponse, LlmConfigResponse, TokenCount, TokenCountRequest,
};
use diagram_forge_core::CategoryMap;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{BackendError, OpsError, OpsResult};

const DIAGRAM_CONFIG: &str = "/diagram_config";
const LLM_CONFIG: &str = "/llm_config";
const SOURCE_FOLDERS: &str = "/source_folders";
const GITIGNORE_FILE: &str = "/gitignore_file/";
const INSTRUCTIONS: &str = "/generate_diagram_instructions/";
const TOKEN_COUNT: &str = "/token_count";

/// A rendered diagram as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDiagram {
    /// Raw SVG document.
    pub svg: String,
    /// Companion markdown notes, when the endpoint produces them.
    pub notes: Option<String>,
}

/// Every call the engine makes against the backend.
#[async_trait]
pub trait DiagramBackend: Send + Sync {
    /// Diagram category → option map.
    async fn diagram_config(&self) -> Result<CategoryMap, BackendError>;

    /// LLM vendor → model map.
    async fn llm_config(&self) -> Result<CategoryMap, BackendError>;

    /// Selectable project roots.
    async fn source_folders(&self) -> Result<Vec<String>, BackendError>;

    /// Ignore file detected under `root_folder`, if any.
    async fn gitignore_file(&self, root_folder: &str) -> Result<Option<String>, BackendError>;

    /// Generate design instructions for the given selection.
    async fn design_instructions(
        &self,
        request: &InstructionsRequest,
    ) -> Result<String, BackendError>;

    /// Estimate tokens and words of a text for a vendor's tokenizer.
    async fn token_count(&self, request: &TokenCountRequest) -> Result<TokenCount, BackendError>;

    /// Produce the diagram.
    async fn generate_diagram(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedDiagram, BackendError>;
}

/// Which backend route renders diagrams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationEndpoint {
    /// `/mermaid_design_request/`, answers with an SVG document.
    #[default]
    MermaidDesignRequest,
    /// `/generate_diagram/`, answers with JSON carrying SVG and notes.
    GenerateDiagram,
}

impl GenerationEndpoint {
    pub fn path(self) -> &'static str {
        match self {
            GenerationEndpoint::MermaidDesignRequest => "/mermaid_design_request/",
            GenerationEndpoint::GenerateDiagram => "/generate_diagram/",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationEndpoint::MermaidDesignRequest => "mermaid_design_request",
            GenerationEndpoint::GenerateDiagram => "generate_diagram",
        }
    }
}

impl fmt::Display for GenerationEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationEndpoint {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_matches('/') {
            "mermaid_design_request" => Ok(GenerationEndpoint::MermaidDesignRequest),
            "generate_diagram" => Ok(GenerationEndpoint::GenerateDiagram),
            other => Err(OpsError::Config(format!(
                "Unknown generation endpoint: {} (expected mermaid_design_request or generate_diagram)",
                other
            ))),
        }
    }
}

/// Source folders arrive either as plain paths or as `{id, name}` entries.
#[derive(Deserialize)]
#[serde(untagged)]
enum FolderEntry {
    Path(String),
    Entry { id: String },
}

impl FolderEntry {
    fn into_path(self) -> String {
        match self {
            FolderEntry::Path(path) | FolderEntry::Entry { id: path } => path,
        }
    }
}

/// [`DiagramBackend`] over the backend's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    generation: GenerationEndpoint,
}

impl HttpBackend {
    /// Build a client from the application settings.
    pub fn new(config: &Config) -> OpsResult<Self> {
        Self::with_endpoint(
            &config.backend_url,
            config.generation_endpoint,
            config.request_timeout(),
        )
    }

    pub fn with_endpoint(
        base_url: &str,
        generation: GenerationEndpoint,
        timeout: Duration,
    ) -> OpsResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OpsError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            generation,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and turn transport failures and non-2xx statuses
    /// into [`BackendError`]s.
    async fn send(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, BackendError> {
        debug!(endpoint, "Calling backend");
        let response = request.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                "request timed out".to_string()
            } else {
                e.to_string()
            };
            warn!(endpoint, error = %message, "Backend unreachable");
            BackendError::network(endpoint, message)
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = error_detail(status, &body);
        warn!(endpoint, status = status.as_u16(), detail = %detail, "Backend returned an error");
        Err(BackendError::from_status(endpoint, status.as_u16(), detail))
    }

    async fn read_text(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<String, BackendError> {
        response
            .text()
            .await
            .map_err(|e| BackendError::network(endpoint, e.to_string()))
    }

    async fn read_json<T: DeserializeOwned>(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let body = Self::read_text(endpoint, response).await?;
        serde_json::from_str(&body).map_err(|e| BackendError::decode(endpoint, e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, BackendError> {
        let response = self.send(endpoint, self.client.get(self.url(endpoint))).await?;
        Self::read_json(endpoint, response).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        let request = self.client.post(self.url(endpoint)).json(body);
        let response = self.send(endpoint, request).await?;
        Self::read_json(endpoint, response).await
    }
}

#[async_trait]
impl DiagramBackend for HttpBackend {
    async fn diagram_config(&self) -> Result<CategoryMap, BackendError> {
        let response: DiagramConfigResponse = self.get_json(DIAGRAM_CONFIG).await?;
        Ok(response.into())
    }

    async fn llm_config(&self) -> Result<CategoryMap, BackendError> {
        let response: LlmConfigResponse = self.get_json(LLM_CONFIG).await?;
        Ok(response.into())
    }

    async fn source_folders(&self) -> Result<Vec<String>, BackendError> {
        let entries: Vec<FolderEntry> = self.get_json(SOURCE_FOLDERS).await?;
        Ok(entries.into_iter().map(FolderEntry::into_path).collect())
    }

    async fn gitignore_file(&self, root_folder: &str) -> Result<Option<String>, BackendError> {
        let request = self
            .client
            .get(self.url(GITIGNORE_FILE))
            .query(&[("root_folder", root_folder)]);

        let response = match self.send(GITIGNORE_FILE, request).await {
            Ok(response) => response,
            // The backend answers 404 for folders it cannot search.
            Err(BackendError::Rejected { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let path: Option<String> = Self::read_json(GITIGNORE_FILE, response).await?;
        Ok(path.filter(|p| !p.trim().is_empty()))
    }

    async fn design_instructions(
        &self,
        request: &InstructionsRequest,
    ) -> Result<String, BackendError> {
        let response: InstructionsResponse = self.post_json(INSTRUCTIONS, request).await?;
        info!(
            chars = response.payload.len(),
            status = ?response.status,
            "Received design instructions"
        );
        Ok(response.payload)
    }

    async fn token_count(&self, request: &TokenCountRequest) -> Result<TokenCount, BackendError> {
        self.post_json(TOKEN_COUNT, request).await
    }

    async fn generate_diagram(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedDiagram, BackendError> {
        let endpoint = self.generation.path();
        let response = self
            .send(endpoint, self.client.post(self.url(endpoint)).json(request))
            .await?;

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));
        let body = Self::read_text(endpoint, response).await?;

        let diagram = decode_diagram(endpoint, &body, is_json)?;
        info!(
            endpoint,
            bytes = diagram.svg.len(),
            notes = diagram.notes.is_some(),
            "Received diagram"
        );
        Ok(diagram)
    }
}

/// Interpret a generation response body as SVG or JSON payload.
fn decode_diagram(
    endpoint: &str,
    body: &str,
    is_json: bool,
) -> Result<GeneratedDiagram, BackendError> {
    let diagram = if is_json || body.trim_start().starts_with('{') {
        let payload: DiagramPayload =
            serde_json::from_str(body).map_err(|e| BackendError::decode(endpoint, e.to_string()))?;
        GeneratedDiagram {
            svg: payload.markdown_svg,
            notes: payload.notes_markdown.filter(|n| !n.trim().is_empty()),
        }
    } else {
        GeneratedDiagram {
            svg: body.to_string(),
            notes: None,
        }
    };

    if diagram.svg.trim().is_empty() {
        return Err(BackendError::decode(endpoint, "empty diagram"));
    }
    Ok(diagram)
}

/// Human-readable reason for a failed request.
///
/// FastAPI reports errors as `{"detail": ...}`; anything else falls back to
/// the raw body, then to the status reason.
fn error_detail(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        match value.get("detail") {
            Some(serde_json::Value::String(detail)) => return detail.clone(),
            Some(detail) => return detail.to_string(),
            None => {}
        }
    }

    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}
