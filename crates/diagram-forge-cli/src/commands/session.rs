//! Interactive session.
//!
//! Reads one command per line from stdin and drives a long-lived engine.
//! Pipeline progress is printed as it happens.

use std::path::PathBuf;

use anyhow::{Context, Result};
use diagram_forge_core::{FieldName, SelectionAxis};
use diagram_forge_engine::{EngineHandle, EngineView, ExportFormat, GenerationState};
use diagram_forge_ops::Config;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use super::run::{start_engine, stop_engine, write_export};

const HELP: &str = "\
Commands:
  set <field> <value>       edit a form field
  category <id>             choose a diagram category
  vendor <id>               choose an LLM vendor
  folder <name>             choose a source folder (looks up its ignore file)
  generate                  generate the diagram
  cancel                    abort a running generation
  export svg|png [path]     write the last diagram
  retry                     re-run failed requests
  reset                     restore the default form
  status                    show the form and pipeline state
  quit                      save and exit";

/// A parsed input line.
#[derive(Debug, PartialEq)]
enum Line {
    Set { field: FieldName, value: String },
    Category(String),
    Vendor(String),
    Folder(String),
    Generate,
    Cancel,
    Export { format: ExportFormat, path: Option<PathBuf> },
    Retry,
    Reset,
    Status,
    Help,
    Quit,
    Empty,
}

fn parse_line(input: &str) -> Result<Line> {
    let input = input.trim();
    let (command, rest) = match input.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (input, ""),
    };

    let argument = |name: &str| -> Result<String> {
        if rest.is_empty() {
            anyhow::bail!("usage: {} <value>", name);
        }
        Ok(rest.to_string())
    };

    Ok(match command {
        "" => Line::Empty,
        "set" => {
            let (field, value) = rest
                .split_once(char::is_whitespace)
                .map(|(field, value)| (field, value.trim()))
                .unwrap_or((rest, ""));
            if field.is_empty() {
                anyhow::bail!("usage: set <field> <value>");
            }
            Line::Set {
                field: field.parse()?,
                value: value.to_string(),
            }
        }
        "category" => Line::Category(argument("category")?),
        "vendor" => Line::Vendor(argument("vendor")?),
        "folder" => Line::Folder(argument("folder")?),
        "generate" => Line::Generate,
        "cancel" => Line::Cancel,
        "export" => {
            let mut parts = rest.split_whitespace();
            let format = parts
                .next()
                .unwrap_or("svg")
                .parse::<ExportFormat>()
                .map_err(anyhow::Error::msg)?;
            Line::Export {
                format,
                path: parts.next().map(PathBuf::from),
            }
        }
        "retry" => Line::Retry,
        "reset" => Line::Reset,
        "status" => Line::Status,
        "help" | "?" => Line::Help,
        "quit" | "exit" => Line::Quit,
        other => anyhow::bail!("unknown command: {} (try `help`)", other),
    })
}

/// Run the session until `quit` or end of input.
pub async fn execute(config: &Config) -> Result<()> {
    let (engine, task) = start_engine(config).await?;
    let reporter = tokio::spawn(report_progress(engine.subscribe()));

    println!("Diagram-Forge session. Type `help` for commands.");
    print_status(&engine.view());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(input) = lines.next_line().await.context("Failed to read stdin")? {
        let line = match parse_line(&input) {
            Ok(line) => line,
            Err(e) => {
                eprintln!("❌ {}", e);
                continue;
            }
        };
        if line == Line::Quit {
            break;
        }
        if let Err(e) = dispatch(&engine, line).await {
            eprintln!("❌ {}", e);
        }
    }

    reporter.abort();
    stop_engine(engine, task).await?;
    println!("👋 Form saved");
    Ok(())
}

async fn dispatch(engine: &EngineHandle, line: Line) -> Result<()> {
    match line {
        Line::Set { field, value } => engine.set(field, &value)?,
        Line::Category(category) => engine.select_category(SelectionAxis::Diagram, category)?,
        Line::Vendor(vendor) => engine.select_category(SelectionAxis::Llm, vendor)?,
        Line::Folder(folder) => engine.select_source_folder(folder)?,
        Line::Generate => {
            if !engine.generate().await? {
                println!("⏳ Generation already running");
            }
        }
        Line::Cancel => engine.cancel_generation()?,
        Line::Export { format, path } => {
            let path = path.unwrap_or_else(|| PathBuf::from(format.default_file_name()));
            write_export(engine, format, &path).await?;
        }
        Line::Retry => engine.retry()?,
        Line::Reset => engine.reset()?,
        Line::Status => print_status(&engine.view()),
        Line::Help => println!("{}", HELP),
        Line::Quit | Line::Empty => {}
    }
    Ok(())
}

/// Print a line whenever a pipeline changes state.
async fn report_progress(mut views: watch::Receiver<EngineView>) {
    let mut last = Progress::of(&views.borrow_and_update());
    while views.changed().await.is_ok() {
        let view = views.borrow_and_update().clone();
        let now = Progress::of(&view);

        if now.instructions != last.instructions {
            match view.instructions.error() {
                Some(err) => println!("📋 instructions: error - {}", err),
                None => println!("📋 instructions: {}", now.instructions),
            }
        }
        if now.tokens != last.tokens {
            if let Some(tokens) = view.tokens() {
                println!("🔢 tokens: {} (≈ {} words)", tokens.token_count, tokens.est_words);
            }
        }
        if now.gitignore != last.gitignore && !view.configuration.gitignore_path.is_empty() {
            println!("🙈 ignore file: {}", view.configuration.gitignore_path);
        }
        if now.generation != last.generation {
            match &view.generation {
                GenerationState::Success(diagram) => println!(
                    "🖼️  diagram: {}x{}{}",
                    diagram.geometry.width,
                    diagram.geometry.height,
                    if diagram.notes.is_some() { " (with notes)" } else { "" }
                ),
                GenerationState::Error(err) => {
                    println!("🖼️  diagram: error - {}", err)
                }
                state => println!("🖼️  diagram: {}", state.label()),
            }
        }
        last = now;
    }
}

/// The parts of a view worth announcing.
#[derive(Debug, PartialEq)]
struct Progress {
    instructions: &'static str,
    tokens: Option<u64>,
    gitignore: String,
    generation: &'static str,
}

impl Progress {
    fn of(view: &EngineView) -> Self {
        Self {
            instructions: view.instructions.label(),
            tokens: view.tokens().map(|tokens| tokens.token_count),
            gitignore: view.configuration.gitignore_path.clone(),
            generation: view.generation.label(),
        }
    }
}

fn print_status(view: &EngineView) {
    println!("📊 Form");
    println!("{:─<50}", "");
    for field in FieldName::ALL {
        if field == FieldName::DesignInstructions {
            continue;
        }
        let value = view.configuration.get(field);
        let value = if value.is_empty() { "(empty)".to_string() } else { value };
        println!("   {:<28}{}", field.as_str(), value);
    }
    let chars = view.configuration.design_instructions.chars().count();
    println!("   {:<28}{} chars", FieldName::DesignInstructions.as_str(), chars);

    println!();
    println!("   instructions:  {}", view.instructions.label());
    match view.tokens() {
        Some(tokens) => println!("   tokens:        {} (≈ {} words)", tokens.token_count, tokens.est_words),
        None => println!("   tokens:        {}", view.token_count.label()),
    }
    println!("   diagram:       {}", view.generation.label());
    for issue in &view.validation {
        println!("   ⚠️  {}", issue);
    }
    println!("   storage:       {}", view.storage_location);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_keeps_spaces_in_value() {
        let line = parse_line("set design_instructions Show every module").unwrap();
        assert_eq!(
            line,
            Line::Set {
                field: FieldName::DesignInstructions,
                value: "Show every module".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_export_defaults_to_svg() {
        assert_eq!(
            parse_line("export").unwrap(),
            Line::Export {
                format: ExportFormat::Svg,
                path: None,
            }
        );
        assert_eq!(
            parse_line("export png out/d.png").unwrap(),
            Line::Export {
                format: ExportFormat::Png,
                path: Some(PathBuf::from("out/d.png")),
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(parse_line("draw").is_err());
        assert!(parse_line("set nonsense 1").is_err());
        assert!(parse_line("folder").is_err());
        assert_eq!(parse_line("   ").unwrap(), Line::Empty);
    }
}
