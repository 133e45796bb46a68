//! Error types for the orchestration engine.

use diagram_forge_core::{CoreError, ValidationIssue};
use diagram_forge_ops::BackendError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Required fields are missing; nothing was sent.
    #[error("invalid configuration: {}", describe(.0))]
    Validation(Vec<ValidationIssue>),

    /// A field edit could not be parsed.
    #[error(transparent)]
    Core(CoreError),

    /// A backend request failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Export was requested without a successfully generated diagram.
    #[error("no diagram to export (generation is {state})")]
    NoDiagram { state: &'static str },

    /// The diagram could not be rasterized.
    #[error("export failed: {0}")]
    Export(String),

    /// The engine task has stopped.
    #[error("engine is not running")]
    Closed,
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(issues) => EngineError::Validation(issues),
            other => EngineError::Core(other),
        }
    }
}

fn describe(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagram_forge_core::FieldName;

    #[test]
    fn test_validation_errors_are_lifted() {
        let issue = ValidationIssue::new(FieldName::LlmModel, "Vendor model is required");
        let err = EngineError::from(CoreError::Validation(vec![issue]));
        assert!(matches!(err, EngineError::Validation(ref issues) if issues.len() == 1));
        assert_eq!(
            err.to_string(),
            "invalid configuration: llm_model: Vendor model is required"
        );

        let err = EngineError::from(CoreError::MissingSvgRoot);
        assert!(matches!(err, EngineError::Core(_)));
    }
}
