//! Design-instruction generation driven by settled snapshots.

use std::sync::Arc;

use diagram_forge_core::wire::InstructionsRequest;
use diagram_forge_core::{CacheKey, Configuration, Snapshot};
use diagram_forge_ops::DiagramBackend;
use tracing::debug;

use crate::cache::{Completion, PendingRequest, RequestCache, RequestStatus};

/// Fetches instructions for every settled, complete configuration and
/// writes them back into the live configuration.
#[derive(Debug)]
pub struct DesignInstructionPipeline {
    cache: RequestCache<String>,
    /// Key whose payload was last written into `design_instructions`.
    applied: Option<CacheKey>,
}

impl Default for DesignInstructionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl DesignInstructionPipeline {
    pub fn new() -> Self {
        Self {
            cache: RequestCache::new("instructions"),
            applied: None,
        }
    }

    /// Key over every field except `design_instructions`.
    pub fn key_for(config: &Configuration) -> CacheKey {
        CacheKey::of(&InstructionsRequest::from(config))
    }

    /// Track the live configuration so requests for older keys are dropped.
    pub fn observe(&mut self, config: &Configuration) {
        self.cache.observe(&Self::key_for(config));
    }

    /// Request instructions for a settled snapshot.
    pub fn on_snapshot(
        &mut self,
        snapshot: &Snapshot,
        backend: Arc<dyn DiagramBackend>,
    ) -> PendingRequest<String> {
        let request = InstructionsRequest::from(&snapshot.configuration);
        let key = CacheKey::of(&request);
        let required = snapshot.configuration.instructions_ready();

        self.cache.get(key, required, move || async move {
            backend.design_instructions(&request).await
        })
    }

    pub async fn next_completion(&mut self) -> Completion<String> {
        self.cache.next_completion().await
    }

    /// Write `text` into `config` unless this key's payload already went in.
    ///
    /// Later hits on the same key leave hand edits of the text alone.
    /// Returns `true` if the configuration changed.
    pub fn write_back(&mut self, key: &CacheKey, text: &str, config: &mut Configuration) -> bool {
        if self.applied.as_ref() == Some(key) {
            debug!(key = %key, "Instructions already applied for key");
            return false;
        }
        self.applied = Some(key.clone());
        if config.design_instructions == text {
            return false;
        }
        config.design_instructions = text.to_string();
        true
    }

    pub fn status(&self) -> RequestStatus<String> {
        self.cache.status()
    }

    pub fn fetch_count(&self) -> u64 {
        self.cache.fetch_count()
    }

    pub fn invalidate_errors(&mut self) -> usize {
        self.cache.invalidate_errors()
    }

    pub fn reset(&mut self) {
        self.cache.clear();
        self.applied = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> Configuration {
        Configuration {
            source_folder: "proj".into(),
            gitignore_path: "proj/.gitignore".into(),
            diagram_category: "flowchart".into(),
            diagram_option: "basic".into(),
            llm_vendor: "openai".into(),
            llm_model: "gpt-4".into(),
            ..Configuration::default()
        }
    }

    #[test]
    fn test_write_back_applies_once_per_key() {
        let mut pipeline = DesignInstructionPipeline::new();
        let mut config = ready();
        let key = DesignInstructionPipeline::key_for(&config);

        assert!(pipeline.write_back(&key, "generated", &mut config));
        assert_eq!(config.design_instructions, "generated");

        config.design_instructions = "hand edited".into();
        assert!(!pipeline.write_back(&key, "generated", &mut config));
        assert_eq!(config.design_instructions, "hand edited");
    }

    #[test]
    fn test_new_key_overwrites_text() {
        let mut pipeline = DesignInstructionPipeline::new();
        let mut config = ready();
        let first = DesignInstructionPipeline::key_for(&config);
        pipeline.write_back(&first, "flowchart text", &mut config);

        config.diagram_option = "swimlane".into();
        let second = DesignInstructionPipeline::key_for(&config);
        assert_ne!(first, second);
        assert!(pipeline.write_back(&second, "swimlane text", &mut config));
        assert_eq!(config.design_instructions, "swimlane text");
    }

    #[test]
    fn test_reset_forgets_applied_key() {
        let mut pipeline = DesignInstructionPipeline::new();
        let mut config = ready();
        let key = DesignInstructionPipeline::key_for(&config);
        pipeline.write_back(&key, "text", &mut config);

        pipeline.reset();
        config.design_instructions.clear();
        assert!(pipeline.write_back(&key, "text", &mut config));
    }
}
