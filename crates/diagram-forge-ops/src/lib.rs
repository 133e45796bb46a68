//! Diagram-Forge I/O layer.
//!
//! Everything that touches the outside world lives here so the engine can be
//! driven by fakes in tests:
//!
//! - **Config**: application settings loaded from disk and the environment
//! - **StateStore**: the persisted form values, on top of a pluggable
//!   [`KeyValueStore`]
//! - **DiagramBackend**: the generation backend contract, with
//!   [`HttpBackend`] speaking its HTTP API
//!
//! ## Usage
//!
//! ```rust,no_run
//! use diagram_forge_ops::{Config, DiagramBackend, HttpBackend, StateStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let backend = HttpBackend::new(&config)?;
//!     let mut store = StateStore::file(config.state_dir.clone());
//!
//!     let folders = backend.source_folders().await?;
//!     println!("{} folders, restored {:?}", folders.len(), store.load().source_folder);
//!     Ok(())
//! }
//! ```

mod backend;
mod config;
mod error;
mod store;

pub use backend::{DiagramBackend, GeneratedDiagram, GenerationEndpoint, HttpBackend};
pub use config::Config;
pub use error::{BackendError, ErrorKind, OpsError, OpsResult};
pub use store::{FileStore, KeyValueStore, MemoryStore, StateStore, FORM_VALUES_KEY};
