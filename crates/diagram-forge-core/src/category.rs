//! Two-level category → options maps and the cascading reset.
//!
//! The same resolver serves both selection axes: diagram category → diagram
//! option, and LLM vendor → model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::configuration::{Configuration, FieldName};

/// One selectable option within a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryOption {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Context window of an LLM model; absent for diagram options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_token_length: Option<u32>,
}

impl CategoryOption {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            max_token_length: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Immutable `category id → ordered options` map with display names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMap {
    categories: BTreeMap<String, Vec<CategoryOption>>,
    /// Display order and names of the categories.
    #[serde(default)]
    names: Vec<CategoryOption>,
}

impl CategoryMap {
    /// Build a map from its options and the ordered display names.
    pub fn from_parts(
        categories: BTreeMap<String, Vec<CategoryOption>>,
        names: Vec<CategoryOption>,
    ) -> Self {
        Self { categories, names }
    }

    /// Add or replace a category.
    pub fn insert(&mut self, category: impl Into<String>, options: Vec<CategoryOption>) {
        self.categories.insert(category.into(), options);
    }

    /// Options of `category`, or an empty slice if it is unknown.
    pub fn options(&self, category: &str) -> &[CategoryOption] {
        self.categories
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether `category` is a known key.
    pub fn contains(&self, category: &str) -> bool {
        self.categories.contains_key(category)
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Category ids in display order: named categories first, then the rest
    /// alphabetically.
    pub fn category_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .names
            .iter()
            .map(|entry| entry.id.as_str())
            .filter(|id| self.categories.contains_key(*id))
            .collect();
        for id in self.categories.keys() {
            if !ids.contains(&id.as_str()) {
                ids.push(id.as_str());
            }
        }
        ids
    }

    /// Display name of a category, falling back to its id.
    pub fn display_name<'a>(&'a self, category: &'a str) -> &'a str {
        self.names
            .iter()
            .find(|entry| entry.id == category)
            .map(|entry| entry.name.as_str())
            .unwrap_or(category)
    }

    /// The category a fresh session starts with.
    pub fn first_category(&self) -> Option<&str> {
        self.category_ids().into_iter().next()
    }

    /// Selection produced by switching the parent axis to `category`.
    ///
    /// The dependent option is reset to the first option of the new list, or
    /// empty if the category has none.
    pub fn on_category_change(&self, category: &str) -> Selection {
        Selection {
            category: category.to_string(),
            option: self
                .options(category)
                .first()
                .map(|option| option.id.clone())
                .unwrap_or_default(),
        }
    }
}

/// Which parent/dependent field pair a selection targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionAxis {
    /// `diagram_category` → `diagram_option`
    Diagram,
    /// `llm_vendor` → `llm_model`
    Llm,
}

impl SelectionAxis {
    pub fn parent_field(self) -> FieldName {
        match self {
            SelectionAxis::Diagram => FieldName::DiagramCategory,
            SelectionAxis::Llm => FieldName::LlmVendor,
        }
    }

    pub fn dependent_field(self) -> FieldName {
        match self {
            SelectionAxis::Diagram => FieldName::DiagramOption,
            SelectionAxis::Llm => FieldName::LlmModel,
        }
    }
}

/// A consistent (category, option) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub category: String,
    pub option: String,
}

impl Selection {
    /// Write both fields of the axis in one step. Returns `true` if anything
    /// changed.
    pub fn apply_to(self, config: &mut Configuration, axis: SelectionAxis) -> bool {
        let (parent, child) = match axis {
            SelectionAxis::Diagram => (&mut config.diagram_category, &mut config.diagram_option),
            SelectionAxis::Llm => (&mut config.llm_vendor, &mut config.llm_model),
        };
        let changed = *parent != self.category || *child != self.option;
        *parent = self.category;
        *child = self.option;
        changed
    }
}

/// Everything the backend tells us about what can be selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub diagrams: CategoryMap,
    pub llms: CategoryMap,
    pub source_folders: Vec<String>,
}

impl Catalog {
    /// The map serving an axis.
    pub fn map(&self, axis: SelectionAxis) -> &CategoryMap {
        match axis {
            SelectionAxis::Diagram => &self.diagrams,
            SelectionAxis::Llm => &self.llms,
        }
    }

    /// Options currently selectable for the dependent field of `axis`.
    pub fn options_for<'a>(
        &'a self,
        config: &Configuration,
        axis: SelectionAxis,
    ) -> &'a [CategoryOption] {
        let (parent, _) = config.selection(axis);
        self.map(axis).options(parent)
    }

    /// Fill empty parent selections with the first category of each axis.
    ///
    /// Returns `true` if the configuration changed.
    pub fn apply_defaults(&self, config: &mut Configuration) -> bool {
        let mut changed = false;
        for axis in [SelectionAxis::Diagram, SelectionAxis::Llm] {
            let (parent, _) = config.selection(axis);
            if !parent.is_empty() {
                continue;
            }
            if let Some(first) = self.map(axis).first_category() {
                let selection = self.map(axis).on_category_change(first);
                changed |= selection.apply_to(config, axis);
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagrams() -> CategoryMap {
        let mut categories = BTreeMap::new();
        categories.insert(
            "flowchart".to_string(),
            vec![
                CategoryOption::new("basic", "Basic"),
                CategoryOption::new("swimlane", "Swimlane"),
            ],
        );
        categories.insert(
            "sequence".to_string(),
            vec![CategoryOption::new("calls", "Call sequence")],
        );
        categories.insert("empty".to_string(), vec![]);
        CategoryMap::from_parts(
            categories,
            vec![
                CategoryOption::new("sequence", "Sequence Diagrams"),
                CategoryOption::new("flowchart", "Flowcharts"),
            ],
        )
    }

    #[test]
    fn test_options_for_unknown_category_is_empty() {
        let map = diagrams();
        assert_eq!(map.options("flowchart").len(), 2);
        assert!(map.options("gantt").is_empty());
    }

    #[test]
    fn test_category_change_selects_first_option() {
        let map = diagrams();
        let selection = map.on_category_change("flowchart");
        assert_eq!(selection.category, "flowchart");
        assert_eq!(selection.option, "basic");
    }

    #[test]
    fn test_category_change_to_empty_list_clears_option() {
        let map = diagrams();
        assert_eq!(map.on_category_change("empty").option, "");
        assert_eq!(map.on_category_change("missing").option, "");
    }

    #[test]
    fn test_selection_updates_both_fields() {
        let map = diagrams();
        let mut config = Configuration {
            diagram_category: "flowchart".into(),
            diagram_option: "swimlane".into(),
            ..Configuration::default()
        };

        assert!(map.on_category_change("sequence").apply_to(&mut config, SelectionAxis::Diagram));
        assert_eq!(config.diagram_category, "sequence");
        assert_eq!(config.diagram_option, "calls");

        assert!(!map.on_category_change("sequence").apply_to(&mut config, SelectionAxis::Diagram));
    }

    #[test]
    fn test_display_order_follows_names() {
        let map = diagrams();
        assert_eq!(map.category_ids(), vec!["sequence", "flowchart", "empty"]);
        assert_eq!(map.display_name("flowchart"), "Flowcharts");
        assert_eq!(map.display_name("empty"), "empty");
        assert_eq!(map.first_category(), Some("sequence"));
    }

    #[test]
    fn test_apply_defaults_fills_only_empty_axes() {
        let mut llms = CategoryMap::default();
        llms.insert("openai", vec![CategoryOption::new("gpt-4", "GPT-4")]);
        let catalog = Catalog {
            diagrams: diagrams(),
            llms,
            source_folders: vec![],
        };

        let mut config = Configuration {
            diagram_category: "flowchart".into(),
            diagram_option: "swimlane".into(),
            ..Configuration::default()
        };
        assert!(catalog.apply_defaults(&mut config));
        assert_eq!(config.diagram_option, "swimlane");
        assert_eq!(config.llm_vendor, "openai");
        assert_eq!(config.llm_model, "gpt-4");
        assert!(!catalog.apply_defaults(&mut config));
    }
}
