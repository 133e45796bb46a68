//! Catalog command implementation.
//!
//! Lists what the backend offers for each selection.

use anyhow::{Context, Result};
use diagram_forge_core::CategoryMap;
use diagram_forge_ops::{Config, DiagramBackend, HttpBackend};

/// Fetch and print diagram types, vendors and source folders.
pub async fn execute(config: &Config) -> Result<()> {
    let backend = HttpBackend::new(config)?;

    let (diagrams, llms, folders) = tokio::join!(
        backend.diagram_config(),
        backend.llm_config(),
        backend.source_folders(),
    );
    let diagrams = diagrams.context("Failed to load diagram types")?;
    let llms = llms.context("Failed to load LLM vendors")?;
    let folders = folders.context("Failed to load source folders")?;

    println!("📐 Diagram types");
    print_map(&diagrams);

    println!();
    println!("🤖 LLM vendors");
    print_map(&llms);

    println!();
    println!("📁 Source folders");
    if folders.is_empty() {
        println!("   (none)");
    }
    for folder in &folders {
        println!("   • {}", folder);
    }

    Ok(())
}

fn print_map(map: &CategoryMap) {
    if map.is_empty() {
        println!("   (none)");
        return;
    }
    for category in map.category_ids() {
        println!("   {} ({})", map.display_name(category), category);
        let options = map.options(category);
        if options.is_empty() {
            println!("      (no options)");
        }
        for option in options {
            match &option.description {
                Some(description) => {
                    println!("      • {:<20} {} - {}", option.id, option.name, description)
                }
                None => println!("      • {:<20} {}", option.id, option.name),
            }
        }
    }
}
