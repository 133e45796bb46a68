//! Request and response bodies exchanged with the generation backend.
//!
//! Field names follow what the backend expects on each endpoint, which is
//! snake_case for instructions and token counts and camelCase for diagram
//! generation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::category::{CategoryMap, CategoryOption};
use crate::configuration::Configuration;

/// Body of `/generate_diagram_instructions/`.
///
/// Carries every configuration field except `design_instructions`, which is
/// what the request produces. Its serialization doubles as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionsRequest {
    pub source_folder_option: String,
    pub diagram_category: String,
    pub diagram_option: String,
    pub include_folder_tree: bool,
    pub include_python_code_outline: bool,
    pub git_ignore_file_path: String,
    pub llm_vendor_for_instructions: String,
    pub llm_model_for_instructions: String,
}

impl From<&Configuration> for InstructionsRequest {
    fn from(config: &Configuration) -> Self {
        Self {
            source_folder_option: config.source_folder.clone(),
            diagram_category: config.diagram_category.clone(),
            diagram_option: config.diagram_option.clone(),
            include_folder_tree: config.include_folder_tree,
            include_python_code_outline: config.include_python_code_outline,
            git_ignore_file_path: config.gitignore_path.clone(),
            llm_vendor_for_instructions: config.llm_vendor.clone(),
            llm_model_for_instructions: config.llm_model.clone(),
        }
    }
}

/// Response of `/generate_diagram_instructions/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionsResponse {
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Body of `/token_count`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenCountRequest {
    pub text: String,
    pub llm_vendor: String,
}

impl TokenCountRequest {
    pub fn new(text: impl Into<String>, llm_vendor: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            llm_vendor: llm_vendor.into(),
        }
    }

    /// Counting needs both some text and a vendor whose tokenizer to use.
    pub fn is_complete(&self) -> bool {
        !self.text.trim().is_empty() && !self.llm_vendor.is_empty()
    }
}

/// Response of `/token_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    pub token_count: u64,
    pub est_words: u64,
}

/// Body of the diagram generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub text: String,
    pub design_instructions: String,
    pub source_folder_option: String,
    pub diagram_category: String,
    pub diagram_option: String,
    pub include_folder_tree: bool,
    pub include_python_code_outline: bool,
    pub git_ignore_file_path: String,
    pub llm_vendor_for_instructions: String,
    pub llm_model_for_instructions: String,
}

impl From<&Configuration> for GenerationRequest {
    fn from(config: &Configuration) -> Self {
        Self {
            text: config.design_instructions.clone(),
            design_instructions: config.design_instructions.clone(),
            source_folder_option: config.source_folder.clone(),
            diagram_category: config.diagram_category.clone(),
            diagram_option: config.diagram_option.clone(),
            include_folder_tree: config.include_folder_tree,
            include_python_code_outline: config.include_python_code_outline,
            git_ignore_file_path: config.gitignore_path.clone(),
            llm_vendor_for_instructions: config.llm_vendor.clone(),
            llm_model_for_instructions: config.llm_model.clone(),
        }
    }
}

/// JSON flavour of the generation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramPayload {
    pub markdown_svg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_markdown: Option<String>,
}

/// Category display names as the backend may send them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum NameList {
    /// `[{"id": "...", "name": "..."}]`
    Entries(Vec<CategoryOption>),
    /// `{"id": "name"}`
    Map(BTreeMap<String, String>),
    /// `["id", ...]`
    Ids(Vec<String>),
}

impl Default for NameList {
    fn default() -> Self {
        NameList::Entries(Vec::new())
    }
}

impl NameList {
    pub fn into_entries(self) -> Vec<CategoryOption> {
        match self {
            NameList::Entries(entries) => entries,
            NameList::Map(map) => map
                .into_iter()
                .map(|(id, name)| CategoryOption::new(id, name))
                .collect(),
            NameList::Ids(ids) => ids
                .into_iter()
                .map(|id| CategoryOption::new(id.clone(), id))
                .collect(),
        }
    }
}

/// Response of `/diagram_config`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiagramConfigResponse {
    #[serde(alias = "diagramCategories")]
    pub diagram_categories: BTreeMap<String, Vec<CategoryOption>>,
    #[serde(default, alias = "diagramCategoryNames")]
    pub diagram_category_names: NameList,
}

impl From<DiagramConfigResponse> for CategoryMap {
    fn from(response: DiagramConfigResponse) -> Self {
        CategoryMap::from_parts(
            response.diagram_categories,
            response.diagram_category_names.into_entries(),
        )
    }
}

/// Response of `/llm_config`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LlmConfigResponse {
    #[serde(alias = "llmVendors")]
    pub llm_vendors: BTreeMap<String, Vec<CategoryOption>>,
    #[serde(default, alias = "llmVendorNames")]
    pub llm_vendor_names: NameList,
}

impl From<LlmConfigResponse> for CategoryMap {
    fn from(response: LlmConfigResponse) -> Self {
        CategoryMap::from_parts(response.llm_vendors, response.llm_vendor_names.into_entries())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generation_request_uses_backend_names() {
        let config = Configuration {
            source_folder: "proj".into(),
            gitignore_path: "proj/.gitignore".into(),
            llm_vendor: "openai".into(),
            design_instructions: "draw it".into(),
            ..Configuration::default()
        };
        let body = serde_json::to_value(GenerationRequest::from(&config)).unwrap();
        assert_eq!(body["sourceFolderOption"], "proj");
        assert_eq!(body["gitIgnoreFilePath"], "proj/.gitignore");
        assert_eq!(body["llmVendorForInstructions"], "openai");
        assert_eq!(body["text"], "draw it");
        assert_eq!(body["designInstructions"], "draw it");
        assert_eq!(body["includeFolderTree"], true);
    }

    #[test]
    fn test_llm_config_accepts_camel_case() {
        let response: LlmConfigResponse = serde_json::from_value(json!({
            "llmVendors": {
                "openai": [{"id": "gpt-4", "name": "GPT-4", "description": "", "max_token_length": 8192}]
            },
            "llmVendorNames": [{"id": "openai", "name": "OpenAI"}]
        }))
        .unwrap();
        let map = CategoryMap::from(response);
        assert_eq!(map.options("openai")[0].max_token_length, Some(8192));
        assert_eq!(map.display_name("openai"), "OpenAI");
    }

    #[test]
    fn test_diagram_config_accepts_name_map() {
        let response: DiagramConfigResponse = serde_json::from_value(json!({
            "diagram_categories": {"flowchart": [{"id": "basic", "name": "Basic"}]},
            "diagram_category_names": {"flowchart": "Flowcharts"}
        }))
        .unwrap();
        let map = CategoryMap::from(response);
        assert_eq!(map.display_name("flowchart"), "Flowcharts");
        assert_eq!(map.on_category_change("flowchart").option, "basic");
    }

    #[test]
    fn test_token_request_completeness() {
        assert!(TokenCountRequest::new("hello", "openai").is_complete());
        assert!(!TokenCountRequest::new("   ", "openai").is_complete());
        assert!(!TokenCountRequest::new("hello", "").is_complete());
    }
}
