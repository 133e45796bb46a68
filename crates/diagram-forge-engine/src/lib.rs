//! Diagram-Forge orchestration engine.
//!
//! Turns a continuously edited [`Configuration`](diagram_forge_core::Configuration)
//! into a disciplined sequence of backend calls:
//!
//! ```text
//! edit ─▶ DebouncedSnapshotter (500ms) ─▶ StateStore
//!                    │
//!                    ▼
//!         DesignInstructionPipeline ─▶ RequestCache ─▶ /generate_diagram_instructions/
//!                    │ write-back
//!                    ▼
//!         TokenCountEstimator (50ms) ─▶ RequestCache ─▶ /token_count
//!
//! trigger ─▶ DiagramGenerationStage ─▶ SvgGeometry ─▶ ExportStage
//! ```
//!
//! Everything runs inside one [`Engine`] task; callers hold an
//! [`EngineHandle`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use diagram_forge_engine::{Engine, EngineSettings, ExportFormat};
//! use diagram_forge_ops::{Config, HttpBackend, StateStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let backend = Arc::new(HttpBackend::new(&config)?);
//!     let store = StateStore::file(config.state_dir.clone());
//!
//!     let (engine, _task) = Engine::spawn(EngineSettings::from(&config), store, backend);
//!     engine.select_source_folder("my-project")?;
//!     engine.wait_for(|view| view.instructions.payload().is_some()).await?;
//!
//!     engine.generate().await?;
//!     engine.wait_for(|view| view.diagram().is_some()).await?;
//!     let png = engine.export(ExportFormat::Png).await?;
//!     std::fs::write("diagram.png", png)?;
//!     Ok(())
//! }
//! ```

mod cache;
mod debounce;
mod engine;
mod error;
mod export;
mod generation;
mod instructions;
pub mod test_fixtures;
mod tokens;

pub use cache::{Completion, PendingRequest, RequestCache, RequestStatus};
pub use debounce::{DebouncedSnapshotter, Debouncer};
pub use engine::{Engine, EngineHandle, EngineSettings, EngineView};
pub use error::{EngineError, EngineResult};
pub use export::{export_vector, ExportFormat, ExportStage, NOTES_FILE_NAME};
pub use generation::{DiagramGenerationStage, GenerationState, RenderedDiagram};
pub use instructions::DesignInstructionPipeline;
pub use tokens::{TokenCountEstimator, TokenEvent};
