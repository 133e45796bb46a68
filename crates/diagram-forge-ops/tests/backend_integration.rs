//! Integration tests for the HTTP backend client.
//!
//! Each test starts a small axum router on a random local port that mimics
//! the generation backend, then drives [`HttpBackend`] against it.
//!
//! Run with: `cargo test --package diagram-forge-ops --test backend_integration`

use std::time::Duration;

use axum::{
    extract::Query,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use diagram_forge_core::wire::{GenerationRequest, InstructionsRequest, TokenCountRequest};
use diagram_forge_core::Configuration;
use diagram_forge_ops::{BackendError, DiagramBackend, ErrorKind, GenerationEndpoint, HttpBackend};
use serde::Deserialize;
use serde_json::{json, Value};

/// Serve `router` on an ephemeral port and return its base URL.
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base_url: &str, endpoint: GenerationEndpoint) -> HttpBackend {
    HttpBackend::with_endpoint(base_url, endpoint, Duration::from_secs(5)).unwrap()
}

fn configuration() -> Configuration {
    Configuration {
        source_folder: "proj".into(),
        gitignore_path: "proj/.gitignore".into(),
        diagram_category: "flowchart".into(),
        diagram_option: "basic".into(),
        llm_vendor: "openai".into(),
        llm_model: "gpt-4".into(),
        design_instructions: "Draw the modules".into(),
        ..Configuration::default()
    }
}

#[derive(Deserialize)]
struct RootFolder {
    root_folder: String,
}

fn fake_backend() -> Router {
    Router::new()
        .route(
            "/diagram_config",
            get(|| async {
                Json(json!({
                    "diagram_categories": {
                        "flowchart": [{"id": "basic", "name": "Basic"}],
                        "sequence": [{"id": "calls", "name": "Calls"}]
                    },
                    "diagram_category_names": [
                        {"id": "sequence", "name": "Sequence"},
                        {"id": "flowchart", "name": "Flowchart"}
                    ]
                }))
            }),
        )
        .route(
            "/llm_config",
            get(|| async {
                Json(json!({
                    "llmVendors": {"openai": [{"id": "gpt-4", "name": "GPT-4", "max_token_length": 8192}]},
                    "llmVendorNames": [{"id": "openai", "name": "OpenAI"}]
                }))
            }),
        )
        .route(
            "/source_folders",
            get(|| async { Json(json!(["proj", {"id": "other", "name": "Other"}])) }),
        )
        .route(
            "/gitignore_file/",
            get(|Query(q): Query<RootFolder>| async move {
                match q.root_folder.as_str() {
                    "proj" => Json(json!("proj/.gitignore")).into_response(),
                    "bare" => Json(Value::Null).into_response(),
                    _ => (StatusCode::NOT_FOUND, Json(json!({"detail": "no such folder"})))
                        .into_response(),
                }
            }),
        )
        .route(
            "/generate_diagram_instructions/",
            post(|Json(body): Json<Value>| async move {
                let payload = format!(
                    "Instructions for {} / {}",
                    body["diagram_category"].as_str().unwrap_or_default(),
                    body["llm_model_for_instructions"].as_str().unwrap_or_default()
                );
                Json(json!({"payload": payload, "status": "ok"}))
            }),
        )
        .route(
            "/token_count",
            post(|Json(body): Json<Value>| async move {
                let words = body["text"].as_str().unwrap_or_default().split_whitespace().count();
                Json(json!({"token_count": words * 2, "est_words": words}))
            }),
        )
        .route(
            "/mermaid_design_request/",
            post(|Json(body): Json<Value>| async move {
                if body["text"].as_str().unwrap_or_default().is_empty() {
                    return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"detail": "text is empty"})))
                        .into_response();
                }
                (
                    [(header::CONTENT_TYPE, "image/svg+xml")],
                    r#"<svg xmlns="http://www.w3.org/2000/svg" width="120" height="80"></svg>"#,
                )
                    .into_response()
            }),
        )
        .route(
            "/generate_diagram/",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"detail": "mermaid-cli crashed"})),
                )
            }),
        )
}

#[tokio::test]
async fn test_catalog_endpoints() {
    let base = serve(fake_backend()).await;
    let backend = client(&base, GenerationEndpoint::MermaidDesignRequest);

    let diagrams = backend.diagram_config().await.unwrap();
    assert_eq!(diagrams.category_ids(), vec!["sequence", "flowchart"]);
    assert_eq!(diagrams.options("flowchart")[0].id, "basic");

    let llms = backend.llm_config().await.unwrap();
    assert_eq!(llms.display_name("openai"), "OpenAI");
    assert_eq!(llms.options("openai")[0].max_token_length, Some(8192));

    let folders = backend.source_folders().await.unwrap();
    assert_eq!(folders, vec!["proj", "other"]);
}

#[tokio::test]
async fn test_gitignore_lookup() {
    let base = serve(fake_backend()).await;
    let backend = client(&base, GenerationEndpoint::MermaidDesignRequest);

    assert_eq!(
        backend.gitignore_file("proj").await.unwrap().as_deref(),
        Some("proj/.gitignore")
    );
    assert_eq!(backend.gitignore_file("bare").await.unwrap(), None);
    assert_eq!(backend.gitignore_file("missing").await.unwrap(), None);
}

#[tokio::test]
async fn test_instructions_and_token_count() {
    let base = serve(fake_backend()).await;
    let backend = client(&base, GenerationEndpoint::MermaidDesignRequest);

    let request = InstructionsRequest::from(&configuration());
    let text = backend.design_instructions(&request).await.unwrap();
    assert_eq!(text, "Instructions for flowchart / gpt-4");

    let count = backend
        .token_count(&TokenCountRequest::new(text, "openai"))
        .await
        .unwrap();
    assert_eq!(count.est_words, 5);
    assert_eq!(count.token_count, 10);
}

#[tokio::test]
async fn test_svg_generation() {
    let base = serve(fake_backend()).await;
    let backend = client(&base, GenerationEndpoint::MermaidDesignRequest);

    let diagram = backend
        .generate_diagram(&GenerationRequest::from(&configuration()))
        .await
        .unwrap();
    assert!(diagram.svg.starts_with("<svg"));
    assert_eq!(diagram.notes, None);
}

#[tokio::test]
async fn test_rejected_request_is_validation_error() {
    let base = serve(fake_backend()).await;
    let backend = client(&base, GenerationEndpoint::MermaidDesignRequest);

    let mut config = configuration();
    config.design_instructions.clear();
    let err = backend
        .generate_diagram(&GenerationRequest::from(&config))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("text is empty"));
}

#[tokio::test]
async fn test_server_error_carries_detail() {
    let base = serve(fake_backend()).await;
    let backend = client(&base, GenerationEndpoint::GenerateDiagram);

    let err = backend
        .generate_diagram(&GenerationRequest::from(&configuration()))
        .await
        .unwrap_err();

    match err {
        BackendError::Server { status, detail, .. } => {
            assert_eq!(status, 500);
            assert_eq!(detail, "mermaid-cli crashed");
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_json_generation_with_notes() {
    let router = Router::new().route(
        "/generate_diagram/",
        post(|| async {
            Json(json!({
                "markdown_svg": "<svg viewBox=\"0 0 300 150\"></svg>",
                "notes_markdown": "# Design notes"
            }))
        }),
    );
    let base = serve(router).await;
    let backend = client(&base, GenerationEndpoint::GenerateDiagram);

    let diagram = backend
        .generate_diagram(&GenerationRequest::from(&configuration()))
        .await
        .unwrap();
    assert!(diagram.svg.contains("viewBox"));
    assert_eq!(diagram.notes.as_deref(), Some("# Design notes"));
}

#[tokio::test]
async fn test_unreachable_backend_is_retryable() {
    // Bind then drop to get a port with nothing listening
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend = client(&format!("http://{}", addr), GenerationEndpoint::MermaidDesignRequest);
    let err = backend.source_folders().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_malformed_body_is_parse_error() {
    let router = Router::new().route("/token_count", post(|| async { "not json" }));
    let base = serve(router).await;
    let backend = client(&base, GenerationEndpoint::MermaidDesignRequest);

    let err = backend
        .token_count(&TokenCountRequest::new("hello", "openai"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
}
