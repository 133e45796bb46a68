//! The user-edited form record and its field addressing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::category::{Catalog, SelectionAxis};
use crate::error::{CoreError, CoreResult};

/// The mutable record the user edits.
///
/// One instance is owned by the engine for the lifetime of a session. It is
/// restored from persistence at startup (or created with defaults) and then
/// mutated field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Project root selected from the backend's source folders.
    pub source_folder: String,

    /// Ignore file used to filter the project when analysing it.
    pub gitignore_path: String,

    /// Selected diagram category (parent axis).
    pub diagram_category: String,

    /// Selected diagram option within the category (dependent axis).
    pub diagram_option: String,

    /// Whether the folder tree is part of the analysis.
    pub include_folder_tree: bool,

    /// Whether a python code outline is part of the analysis.
    pub include_python_code_outline: bool,

    /// Selected LLM vendor (parent axis).
    pub llm_vendor: String,

    /// Selected model within the vendor (dependent axis).
    pub llm_model: String,

    /// Generated (and optionally hand-edited) design instructions.
    pub design_instructions: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            source_folder: String::new(),
            gitignore_path: String::new(),
            diagram_category: String::new(),
            diagram_option: String::new(),
            include_folder_tree: true,
            include_python_code_outline: true,
            llm_vendor: String::new(),
            llm_model: String::new(),
            design_instructions: String::new(),
        }
    }
}

impl Configuration {
    /// Apply a single field edit. Returns `true` if the value changed.
    pub fn apply(&mut self, edit: FieldEdit) -> bool {
        fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
            if *slot == value {
                false
            } else {
                *slot = value;
                true
            }
        }

        match edit {
            FieldEdit::SourceFolder(v) => replace(&mut self.source_folder, v),
            FieldEdit::GitignorePath(v) => replace(&mut self.gitignore_path, v),
            FieldEdit::DiagramCategory(v) => replace(&mut self.diagram_category, v),
            FieldEdit::DiagramOption(v) => replace(&mut self.diagram_option, v),
            FieldEdit::IncludeFolderTree(v) => replace(&mut self.include_folder_tree, v),
            FieldEdit::IncludePythonCodeOutline(v) => {
                replace(&mut self.include_python_code_outline, v)
            }
            FieldEdit::LlmVendor(v) => replace(&mut self.llm_vendor, v),
            FieldEdit::LlmModel(v) => replace(&mut self.llm_model, v),
            FieldEdit::DesignInstructions(v) => replace(&mut self.design_instructions, v),
        }
    }

    /// Render a field's current value as text.
    pub fn get(&self, field: FieldName) -> String {
        match field {
            FieldName::SourceFolder => self.source_folder.clone(),
            FieldName::GitignorePath => self.gitignore_path.clone(),
            FieldName::DiagramCategory => self.diagram_category.clone(),
            FieldName::DiagramOption => self.diagram_option.clone(),
            FieldName::IncludeFolderTree => self.include_folder_tree.to_string(),
            FieldName::IncludePythonCodeOutline => self.include_python_code_outline.to_string(),
            FieldName::LlmVendor => self.llm_vendor.clone(),
            FieldName::LlmModel => self.llm_model.clone(),
            FieldName::DesignInstructions => self.design_instructions.clone(),
        }
    }

    /// Parent/dependent selection pair for an axis.
    pub fn selection(&self, axis: SelectionAxis) -> (&str, &str) {
        match axis {
            SelectionAxis::Diagram => (&self.diagram_category, &self.diagram_option),
            SelectionAxis::Llm => (&self.llm_vendor, &self.llm_model),
        }
    }

    /// Whether every field that feeds instruction generation is populated.
    ///
    /// The two flags always count as populated; `design_instructions` is the
    /// output of that request and is not considered.
    pub fn instructions_ready(&self) -> bool {
        [
            &self.source_folder,
            &self.gitignore_path,
            &self.diagram_category,
            &self.diagram_option,
            &self.llm_vendor,
            &self.llm_model,
        ]
        .iter()
        .all(|value| !value.is_empty())
    }

    /// Check the fields required to submit a generation request.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let required = [
            (FieldName::SourceFolder, &self.source_folder, "Project folder is required"),
            (FieldName::DiagramCategory, &self.diagram_category, "Diagram category is required"),
            (FieldName::DiagramOption, &self.diagram_option, "Diagram option is required"),
            (FieldName::LlmVendor, &self.llm_vendor, "Vendor is required"),
            (FieldName::LlmModel, &self.llm_model, "Vendor model is required"),
        ];

        required
            .into_iter()
            .filter(|(_, value, _)| value.is_empty())
            .map(|(field, _, message)| ValidationIssue::new(field, message))
            .collect()
    }

    /// Like [`validate`](Self::validate), but explains empty dependent
    /// selections caused by a category without options.
    pub fn validate_with(&self, catalog: &Catalog) -> Vec<ValidationIssue> {
        let mut issues = self.validate();
        for axis in [SelectionAxis::Diagram, SelectionAxis::Llm] {
            let (parent, child) = self.selection(axis);
            if parent.is_empty() || !child.is_empty() {
                continue;
            }
            if catalog.map(axis).options(parent).is_empty() {
                let field = axis.dependent_field();
                issues.retain(|issue| issue.field != field);
                issues.push(ValidationIssue::new(
                    field,
                    format!("no options available for {parent}"),
                ));
            }
        }
        issues
    }

    /// Fail with [`CoreError::Validation`] if any required field is missing.
    pub fn ensure_valid(&self, catalog: &Catalog) -> CoreResult<()> {
        let issues = self.validate_with(catalog);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation(issues))
        }
    }
}

/// Addressable fields of [`Configuration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    SourceFolder,
    GitignorePath,
    DiagramCategory,
    DiagramOption,
    IncludeFolderTree,
    IncludePythonCodeOutline,
    LlmVendor,
    LlmModel,
    DesignInstructions,
}

impl FieldName {
    /// Every field, in declaration order.
    pub const ALL: [FieldName; 9] = [
        FieldName::SourceFolder,
        FieldName::GitignorePath,
        FieldName::DiagramCategory,
        FieldName::DiagramOption,
        FieldName::IncludeFolderTree,
        FieldName::IncludePythonCodeOutline,
        FieldName::LlmVendor,
        FieldName::LlmModel,
        FieldName::DesignInstructions,
    ];

    /// Serialized (snake_case) name, identical to the persisted JSON key.
    pub fn as_str(self) -> &'static str {
        match self {
            FieldName::SourceFolder => "source_folder",
            FieldName::GitignorePath => "gitignore_path",
            FieldName::DiagramCategory => "diagram_category",
            FieldName::DiagramOption => "diagram_option",
            FieldName::IncludeFolderTree => "include_folder_tree",
            FieldName::IncludePythonCodeOutline => "include_python_code_outline",
            FieldName::LlmVendor => "llm_vendor",
            FieldName::LlmModel => "llm_model",
            FieldName::DesignInstructions => "design_instructions",
        }
    }

    /// Fields holding generated content that must never be persisted.
    pub fn volatile() -> &'static [FieldName] {
        &[FieldName::DesignInstructions]
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_");
        FieldName::ALL
            .into_iter()
            .find(|field| field.as_str() == normalized)
            .ok_or_else(|| CoreError::UnknownField {
                name: s.to_string(),
            })
    }
}

/// A single typed field assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldEdit {
    SourceFolder(String),
    GitignorePath(String),
    DiagramCategory(String),
    DiagramOption(String),
    IncludeFolderTree(bool),
    IncludePythonCodeOutline(bool),
    LlmVendor(String),
    LlmModel(String),
    DesignInstructions(String),
}

impl FieldEdit {
    /// Build an edit from a field name and its textual value.
    pub fn parse(field: FieldName, raw: &str) -> CoreResult<Self> {
        let text = raw.to_string();
        Ok(match field {
            FieldName::SourceFolder => FieldEdit::SourceFolder(text),
            FieldName::GitignorePath => FieldEdit::GitignorePath(text),
            FieldName::DiagramCategory => FieldEdit::DiagramCategory(text),
            FieldName::DiagramOption => FieldEdit::DiagramOption(text),
            FieldName::IncludeFolderTree => FieldEdit::IncludeFolderTree(parse_flag(field, raw)?),
            FieldName::IncludePythonCodeOutline => {
                FieldEdit::IncludePythonCodeOutline(parse_flag(field, raw)?)
            }
            FieldName::LlmVendor => FieldEdit::LlmVendor(text),
            FieldName::LlmModel => FieldEdit::LlmModel(text),
            FieldName::DesignInstructions => FieldEdit::DesignInstructions(text),
        })
    }

    /// Parse a `field=value` assignment.
    pub fn parse_assignment(assignment: &str) -> CoreResult<Self> {
        let (name, value) = assignment
            .split_once('=')
            .ok_or_else(|| CoreError::InvalidValue {
                field: "assignment",
                value: assignment.to_string(),
            })?;
        Self::parse(name.parse()?, value)
    }

    /// The field this edit targets.
    pub fn field(&self) -> FieldName {
        match self {
            FieldEdit::SourceFolder(_) => FieldName::SourceFolder,
            FieldEdit::GitignorePath(_) => FieldName::GitignorePath,
            FieldEdit::DiagramCategory(_) => FieldName::DiagramCategory,
            FieldEdit::DiagramOption(_) => FieldName::DiagramOption,
            FieldEdit::IncludeFolderTree(_) => FieldName::IncludeFolderTree,
            FieldEdit::IncludePythonCodeOutline(_) => FieldName::IncludePythonCodeOutline,
            FieldEdit::LlmVendor(_) => FieldName::LlmVendor,
            FieldEdit::LlmModel(_) => FieldName::LlmModel,
            FieldEdit::DesignInstructions(_) => FieldName::DesignInstructions,
        }
    }
}

fn parse_flag(field: FieldName, raw: &str) -> CoreResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(CoreError::InvalidValue {
            field: field.as_str(),
            value: raw.to_string(),
        }),
    }
}

/// A required field that is missing or unusable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: FieldName,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: FieldName, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// An immutable copy of the configuration taken once edits settled.
///
/// Revisions increase monotonically within a session; persistence uses them
/// to drop saves that arrive out of order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub revision: u64,
    pub configuration: Configuration,
}

impl Snapshot {
    pub fn new(revision: u64, configuration: Configuration) -> Self {
        Self {
            revision,
            configuration,
        }
    }
}
