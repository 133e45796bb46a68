//! Error types for the core model.

use thiserror::Error;

use crate::configuration::ValidationIssue;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the core model.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    /// A field name that does not exist on the configuration.
    #[error("unknown field: {name}")]
    UnknownField { name: String },

    /// A value that cannot be assigned to the named field.
    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    /// One or more required fields are missing.
    #[error("{} validation issue(s): {}", .0.len(), summarize(.0))]
    Validation(Vec<ValidationIssue>),

    /// The document could not be parsed as SVG.
    #[error("svg parse error: {0}")]
    SvgParse(String),

    /// The document parsed but has no `<svg>` element.
    #[error("missing <svg> root element")]
    MissingSvgRoot,
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{}: {}", issue.field, issue.message))
        .collect::<Vec<_>>()
        .join("; ")
}
