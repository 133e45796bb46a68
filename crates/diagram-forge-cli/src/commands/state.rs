//! State command implementation.
//!
//! Reads and edits the persisted form values without starting the engine.

use anyhow::{Context, Result};
use diagram_forge_core::{CategoryMap, Configuration, FieldEdit, FieldName, SelectionAxis};
use diagram_forge_ops::{
    Config, DiagramBackend, FileStore, HttpBackend, StateStore, FORM_VALUES_KEY,
};
use tracing::warn;

fn open(config: &Config) -> StateStore {
    StateStore::file(config.state_dir.clone())
}

/// Print the persisted form as JSON.
pub fn show(config: &Config) -> Result<()> {
    let mut store = open(config);
    let form = store.load();
    println!("{}", render(&form)?);
    Ok(())
}

/// Set one persisted field.
pub async fn set(config: &Config, field: &str, value: &str) -> Result<()> {
    let field: FieldName = field.parse()?;
    if FieldName::volatile().contains(&field) {
        anyhow::bail!("{} is generated on demand and never persisted", field);
    }

    let mut store = open(config);
    let mut form = store.load();

    let axis = match field {
        FieldName::DiagramCategory => Some(SelectionAxis::Diagram),
        FieldName::LlmVendor => Some(SelectionAxis::Llm),
        _ => None,
    };
    match axis {
        Some(axis) if form.selection(axis).0 == value => {
            println!("{} unchanged", field);
        }
        Some(axis) => {
            let map = fetch_map(config, axis).await;
            map.on_category_change(value).apply_to(&mut form, axis);
            let (_, option) = form.selection(axis);
            if option.is_empty() {
                println!("{} reset to (empty)", axis.dependent_field());
            } else {
                println!("{} reset to: {}", axis.dependent_field(), option);
            }
        }
        None => {
            form.apply(FieldEdit::parse(field, value)?);
        }
    }

    store.save(&form, &[]);
    if store.is_degraded() {
        anyhow::bail!("Could not write {}", store.location());
    }
    println!("Set {} to: {}", field, form.get(field));
    Ok(())
}

/// Remove the persisted form.
pub fn reset(config: &Config) -> Result<()> {
    let mut store = open(config);
    store.clear();
    println!("Form values reset to defaults");
    Ok(())
}

/// Print where the form is stored.
pub fn path(config: &Config) {
    let store = FileStore::new(config.state_dir.clone());
    println!("{}", store.path_for(FORM_VALUES_KEY).display());
}

/// Options map for `axis`; empty when the backend cannot be reached, so the
/// dependent field is still cleared.
async fn fetch_map(config: &Config, axis: SelectionAxis) -> CategoryMap {
    let backend = match HttpBackend::new(config) {
        Ok(backend) => backend,
        Err(e) => {
            warn!(error = %e, "Could not build backend client");
            return CategoryMap::default();
        }
    };
    let result = match axis {
        SelectionAxis::Diagram => backend.diagram_config().await,
        SelectionAxis::Llm => backend.llm_config().await,
    };
    result.unwrap_or_else(|e| {
        warn!(error = %e, "Catalog unavailable, clearing dependent option");
        CategoryMap::default()
    })
}

fn render(form: &Configuration) -> Result<String> {
    let mut value = serde_json::to_value(form)?;
    if let Some(object) = value.as_object_mut() {
        for field in FieldName::volatile() {
            object.remove(field.as_str());
        }
    }
    serde_json::to_string_pretty(&value).context("Failed to render form values")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_hides_generated_text() {
        let form = Configuration {
            source_folder: "proj".into(),
            design_instructions: "long text".into(),
            ..Configuration::default()
        };
        let rendered = render(&form).unwrap();
        assert!(rendered.contains("\"source_folder\": \"proj\""));
        assert!(!rendered.contains("design_instructions"));
    }
}
