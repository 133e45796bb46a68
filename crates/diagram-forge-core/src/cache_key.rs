//! Deterministic request keys.

use std::fmt;

use serde::Serialize;

/// Deterministic serialization of the fields one downstream request depends
/// on.
///
/// Keys are built from a request DTO whose field order is fixed by its type,
/// so equal inputs always produce byte-identical keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from any serializable request body.
    pub fn of<T: Serialize>(request: &T) -> Self {
        // Serializing plain structs of strings and bools cannot fail.
        let encoded = serde_json::to_string(request).unwrap_or_default();
        Self(encoded)
    }

    /// Build a key from raw text.
    pub fn raw(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MAX: usize = 96;
        if self.0.chars().count() <= MAX {
            f.write_str(&self.0)
        } else {
            let head: String = self.0.chars().take(MAX).collect();
            write!(f, "{head}…")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::Configuration;
    use crate::wire::InstructionsRequest;

    #[test]
    fn test_equal_inputs_produce_equal_keys() {
        let config = Configuration {
            source_folder: "proj".into(),
            ..Configuration::default()
        };
        let a = CacheKey::of(&InstructionsRequest::from(&config));
        let b = CacheKey::of(&InstructionsRequest::from(&config.clone()));
        assert_eq!(a, b);
    }

    #[test]
    fn test_instructions_key_ignores_design_instructions() {
        let mut config = Configuration {
            source_folder: "proj".into(),
            ..Configuration::default()
        };
        let before = CacheKey::of(&InstructionsRequest::from(&config));
        config.design_instructions = "draw boxes".into();
        let after = CacheKey::of(&InstructionsRequest::from(&config));
        assert_eq!(before, after);

        config.llm_model = "gpt-4".into();
        assert_ne!(before, CacheKey::of(&InstructionsRequest::from(&config)));
    }

    #[test]
    fn test_display_truncates_long_keys() {
        let key = CacheKey::raw("x".repeat(200));
        let shown = key.to_string();
        assert!(shown.ends_with('…'));
        assert_eq!(shown.chars().count(), 97);
    }
}
