//! Diagram-Forge CLI - turn a project folder into an LLM-designed diagram.
//!
//! Edits to the form (folder, diagram category/option, vendor/model) are
//! persisted between runs, so `dforge generate` repeats the last setup.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::format::FmtSpan;

mod commands;

use commands::{catalog, config as config_cmd, run, session, state};
use diagram_forge_ops::Config;

/// Diagram-Forge CLI - generate architecture diagrams from source folders.
///
/// Run `dforge session` for an interactive form, or `dforge generate` to
/// render the persisted form in one go.
#[derive(Parser, Debug)]
#[command(
    name = "dforge",
    author,
    version,
    about = "Diagram-Forge: LLM-designed diagrams of your codebase",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommands),

    /// List diagram types, LLM vendors and source folders offered by the backend.
    Catalog,

    /// Inspect or edit the persisted form values.
    #[command(subcommand)]
    State(StateCommands),

    /// Generate design instructions for the form and count their tokens.
    Instructions {
        /// Field assignments applied before running, e.g. `diagram_option=swimlane`.
        #[arg(short, long = "set", value_name = "FIELD=VALUE")]
        assignments: Vec<String>,
    },

    /// Generate a diagram for the form and export it.
    ///
    /// Writes `diagram.svg` to the current directory unless an output is given.
    Generate {
        /// Field assignments applied before running, e.g. `llm_vendor=anthropic`.
        #[arg(short, long = "set", value_name = "FIELD=VALUE")]
        assignments: Vec<String>,

        /// Write the SVG to this path.
        #[arg(long)]
        svg: Option<PathBuf>,

        /// Write a PNG rendering to this path.
        #[arg(long)]
        png: Option<PathBuf>,

        /// Write the backend's notes (markdown) to this path.
        #[arg(long)]
        notes: Option<PathBuf>,
    },

    /// Interactive session reading commands from stdin.
    Session,
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration.
    Show,

    /// Set a configuration value.
    Set {
        /// Configuration key.
        key: String,
        /// Configuration value.
        value: String,
    },

    /// Get a configuration value.
    Get {
        /// Configuration key.
        key: String,
    },

    /// Reset configuration to defaults.
    Reset,

    /// Show path to config file.
    Path,
}

/// Persisted form subcommands.
#[derive(Subcommand, Debug)]
enum StateCommands {
    /// Show the persisted form values.
    Show,

    /// Set a form field. Changing `diagram_category` or `llm_vendor` also
    /// resets the dependent option.
    Set {
        /// Field name, e.g. `source_folder`.
        field: String,
        /// New value.
        value: String,
    },

    /// Forget the persisted form values.
    Reset,

    /// Show path to the state file.
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing based on verbosity, RUST_LOG adds directives on top
    let level = if cli.quiet {
        Level::ERROR
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN // Default to less noise
    };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = Config::load()?;

    match cli.command {
        Commands::Config(config_cmd_inner) => {
            let mut config = config;
            match config_cmd_inner {
                ConfigCommands::Show => {
                    config_cmd::show(&config)?;
                }
                ConfigCommands::Set { key, value } => {
                    config_cmd::set(&mut config, &key, &value)?;
                }
                ConfigCommands::Get { key } => {
                    config_cmd::get(&config, &key)?;
                }
                ConfigCommands::Reset => {
                    config_cmd::reset()?;
                }
                ConfigCommands::Path => {
                    if let Some(path) = Config::config_file_path() {
                        println!("{}", path.display());
                    } else {
                        println!("(no config file path available)");
                    }
                }
            }
        }

        Commands::Catalog => {
            catalog::execute(&config).await?;
        }

        Commands::State(state_cmd) => match state_cmd {
            StateCommands::Show => state::show(&config)?,
            StateCommands::Set { field, value } => state::set(&config, &field, &value).await?,
            StateCommands::Reset => state::reset(&config)?,
            StateCommands::Path => state::path(&config),
        },

        Commands::Instructions { assignments } => {
            run::instructions(&config, &assignments).await?;
        }

        Commands::Generate {
            assignments,
            svg,
            png,
            notes,
        } => {
            let outputs = run::Outputs { svg, png, notes };
            run::generate(&config, &assignments, outputs).await?;
        }

        Commands::Session => {
            session::execute(&config).await?;
        }
    }

    Ok(())
}
