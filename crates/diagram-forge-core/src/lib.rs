//! Core data model for Diagram-Forge.
//!
//! Diagram-Forge turns a continuously edited form (project folder, diagram
//! category/option, LLM vendor/model) into a disciplined chain of backend
//! calls. This crate holds the pieces that carry no I/O:
//!
//! - **Configuration**: the record the user edits, plus [`FieldName`] and
//!   [`FieldEdit`] for addressing individual fields
//! - **Snapshot**: an immutable, revisioned copy of a settled configuration
//! - **CategoryMap**: two-level category → options maps and the cascading
//!   reset applied when a parent selection changes
//! - **CacheKey**: deterministic serialization of the fields a request
//!   depends on
//! - **Wire DTOs**: request/response bodies exchanged with the backend
//! - **SvgGeometry**: intrinsic size recovered from generated SVG

mod cache_key;
mod category;
mod configuration;
mod error;
pub mod svg;
pub mod wire;

pub use cache_key::CacheKey;
pub use category::{Catalog, CategoryMap, CategoryOption, Selection, SelectionAxis};
pub use configuration::{Configuration, FieldEdit, FieldName, Snapshot, ValidationIssue};
pub use error::{CoreError, CoreResult};
pub use svg::SvgGeometry;
