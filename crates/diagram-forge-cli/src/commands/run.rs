//! One-shot engine runs: `instructions` and `generate`.
//!
//! Both start the engine on the persisted form, apply `--set` assignments,
//! wait for the pipelines to settle, and shut down (which persists the
//! edited form).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use diagram_forge_core::{FieldEdit, FieldName};
use diagram_forge_engine::{
    Engine, EngineHandle, EngineSettings, EngineView, ExportFormat, GenerationState,
    RequestStatus, NOTES_FILE_NAME,
};
use diagram_forge_ops::{Config, HttpBackend, StateStore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Where `generate` writes its results.
#[derive(Debug, Default)]
pub struct Outputs {
    pub svg: Option<PathBuf>,
    pub png: Option<PathBuf>,
    pub notes: Option<PathBuf>,
}

/// Fields that must be filled before instructions can be requested.
const INSTRUCTION_FIELDS: [FieldName; 6] = [
    FieldName::SourceFolder,
    FieldName::GitignorePath,
    FieldName::DiagramCategory,
    FieldName::DiagramOption,
    FieldName::LlmVendor,
    FieldName::LlmModel,
];

/// Start an engine against the configured backend and wait for its catalog.
pub async fn start_engine(config: &Config) -> Result<(EngineHandle, JoinHandle<()>)> {
    let backend = Arc::new(HttpBackend::new(config)?);
    let store = StateStore::file(config.state_dir.clone());
    let (engine, task) = Engine::spawn(EngineSettings::from(config), store, backend);

    let view = engine.wait_for(|view| view.ready).await?;
    for error in &view.catalog_errors {
        eprintln!("⚠️  {}", error);
    }
    if view.storage_degraded {
        eprintln!("⚠️  Form values cannot be saved ({})", view.storage_location);
    }
    Ok((engine, task))
}

/// Stop the engine and wait until it persisted the form.
pub async fn stop_engine(engine: EngineHandle, task: JoinHandle<()>) -> Result<()> {
    engine.shutdown()?;
    task.await.context("Engine task failed")?;
    Ok(())
}

/// Apply `field=value` assignments. Choosing a source folder also looks up
/// its ignore file.
pub fn apply_assignments(engine: &EngineHandle, assignments: &[String]) -> Result<()> {
    for assignment in assignments {
        let edit = FieldEdit::parse_assignment(assignment)
            .with_context(|| format!("Invalid assignment: {}", assignment))?;
        debug!(field = %edit.field(), "Applying assignment");
        match edit {
            FieldEdit::SourceFolder(folder) => engine.select_source_folder(folder)?,
            edit => engine.edit(edit)?,
        }
    }
    Ok(())
}

/// Wait until the instructions pipeline has nothing left to do.
async fn settle_instructions(engine: &EngineHandle) -> Result<EngineView> {
    // A fresh engine still has the restored form pending.
    let view = engine.wait_for(|view| view.instructions_settled()).await?;
    Ok(view)
}

fn missing_instruction_fields(view: &EngineView) -> Vec<&'static str> {
    INSTRUCTION_FIELDS
        .into_iter()
        .filter(|field| view.configuration.get(*field).is_empty())
        .map(FieldName::as_str)
        .collect()
}

/// Generate design instructions and print them with their token count.
pub async fn instructions(config: &Config, assignments: &[String]) -> Result<()> {
    let (engine, task) = start_engine(config).await?;
    apply_assignments(&engine, assignments)?;

    let view = settle_instructions(&engine).await?;
    let result = match &view.instructions {
        RequestStatus::Success(_) => Ok(()),
        RequestStatus::Error(err) => Err(anyhow::anyhow!("Instruction generation failed: {}", err)),
        _ => Err(anyhow::anyhow!(
            "Form incomplete, missing: {}",
            missing_instruction_fields(&view).join(", ")
        )),
    };
    if let Err(e) = result {
        stop_engine(engine, task).await?;
        return Err(e);
    }

    let counted = tokio::time::timeout(
        config.request_timeout(),
        engine.wait_for(|view| {
            !view.configuration.design_instructions.is_empty()
                && (view.tokens().is_some() || view.token_count.error().is_some())
        }),
    )
    .await;

    let view = engine.view();
    println!("{}", view.configuration.design_instructions);
    println!();
    match (counted, view.tokens()) {
        (Ok(_), Some(tokens)) => println!(
            "🔢 Tokens: {} (≈ {} words)",
            tokens.token_count, tokens.est_words
        ),
        _ => println!("🔢 Tokens: (unavailable)"),
    }

    stop_engine(engine, task).await
}

/// Generate a diagram and write the requested exports.
pub async fn generate(config: &Config, assignments: &[String], outputs: Outputs) -> Result<()> {
    let (engine, task) = start_engine(config).await?;
    apply_assignments(&engine, assignments)?;

    let view = settle_instructions(&engine).await?;
    if view.configuration.design_instructions.trim().is_empty() {
        let reason = match &view.instructions {
            RequestStatus::Error(err) => err.to_string(),
            _ => format!(
                "missing: {}",
                missing_instruction_fields(&view).join(", ")
            ),
        };
        stop_engine(engine, task).await?;
        anyhow::bail!(
            "No design instructions ({}); fix the form or pass --set design_instructions=...",
            reason
        );
    }
    if let RequestStatus::Error(err) = &view.instructions {
        eprintln!("⚠️  Using the current instruction text, refresh failed: {}", err);
    }

    let result = run_generation(&engine, outputs).await;
    stop_engine(engine, task).await?;
    result
}

async fn run_generation(engine: &EngineHandle, outputs: Outputs) -> Result<()> {
    engine.generate().await?;
    println!("⏳ Generating diagram...");

    let view = engine
        .wait_for(|view| !matches!(view.generation, GenerationState::Loading))
        .await?;
    let diagram = match &view.generation {
        GenerationState::Success(diagram) => Arc::clone(diagram),
        GenerationState::Error(err) => anyhow::bail!("Diagram generation failed: {}", err),
        state => anyhow::bail!("Diagram generation ended in state {}", state.label()),
    };
    info!(
        width = diagram.geometry.width,
        height = diagram.geometry.height,
        "Diagram ready"
    );

    let svg_path = match (&outputs.svg, &outputs.png) {
        (None, None) => Some(PathBuf::from(ExportFormat::Svg.default_file_name())),
        (svg, _) => svg.clone(),
    };
    if let Some(path) = svg_path {
        write_export(engine, ExportFormat::Svg, &path).await?;
    }
    if let Some(path) = &outputs.png {
        write_export(engine, ExportFormat::Png, path).await?;
    }

    match (&diagram.notes, outputs.notes) {
        (Some(notes), Some(path)) => {
            std::fs::write(&path, notes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("📝 Notes written to {}", path.display());
        }
        (Some(_), None) => {
            println!("📝 The backend returned notes; use --notes {} to save them", NOTES_FILE_NAME);
        }
        (None, _) => {}
    }
    Ok(())
}

/// Export `format` and write it to `path`.
pub async fn write_export(engine: &EngineHandle, format: ExportFormat, path: &Path) -> Result<()> {
    let bytes = engine.export(format).await?;
    std::fs::write(path, &bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("✅ Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
