//! mnemo - persistent memory for AI agents
//!
//! Main entry point for the mnemo CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{config, conversation, knowledge, learning, memory};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// mnemo - persistent memory for AI agents
#[derive(Parser)]
#[command(name = "mnemo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file to use instead of the discovered layers
    #[arg(long, global = true, env = "MNEMO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file (overrides [storage] database)
    #[arg(long, global = true, env = "MNEMO_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store a new memory
    Store(memory::StoreArgs),

    /// Recall memories from a time period
    Recall(memory::RecallArgs),

    /// Find memories by topic, person, place or sentiment
    Associations(memory::AssociationsArgs),

    /// Reflect on stored memories
    Reflect(memory::ReflectArgs),

    /// Change a memory's importance or show its history
    Importance(memory::ImportanceArgs),

    /// Walk the related-memory graph
    Related(memory::RelatedArgs),

    /// Record a conversation turn
    Turn(conversation::TurnArgs),

    /// Show recent conversation turns
    History(conversation::HistoryArgs),

    /// Summarize a conversation session
    Summarize(conversation::SummarizeArgs),

    /// Search conversation turns
    SearchTurns(conversation::SearchTurnsArgs),

    /// Quickly capture a note for later expansion
    Capture(learning::CaptureArgs),

    /// Expand a capture into a learning
    Expand(learning::ExpandArgs),

    /// Reinforce a learning after using it
    Reinforce(learning::ReinforceArgs),

    /// Report learning progress for a period
    Progress(learning::ProgressArgs),

    /// Generate a learning path toward a goal
    Path(learning::PathArgs),

    /// Merge near-duplicate memories on a topic
    Consolidate(knowledge::ConsolidateArgs),

    /// Tag memories matching a query with a category
    Organize(knowledge::OrganizeArgs),

    /// Show store statistics
    Stats,

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = mnemo_config::ConfigLoader::new()
        .explicit_file(cli.config.clone())
        .load()?;

    // Initialize tracing: console (stderr) + rotating JSON file
    let logging = loaded.config.logging();
    let console_filter = if cli.verbose {
        "mnemo=debug,mnemo_memory=debug,mnemo_embed=debug,mnemo_config=debug,info".to_string()
    } else {
        logging.level.clone()
    };

    let (file_layer, _guard) = if logging.file {
        let log_dir = logging
            .dir
            .clone()
            .unwrap_or_else(|| loaded.config.storage().effective_data_dir().join("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "mnemo.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        (Some(non_blocking), Some(guard))
    } else {
        (None, None)
    };

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&console_filter)),
                ),
        )
        .with(file_layer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "mnemo=trace,mnemo_memory=debug,mnemo_embed=debug,mnemo_config=debug,info",
                ))
        }))
        .init();

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let sources = loaded.loaded_paths();
    let ctx = commands::Context {
        config: loaded.config,
        sources,
        db_override: cli.db,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Store(args) => memory::store(args, &ctx).await,
        Commands::Recall(args) => memory::recall(args, &ctx).await,
        Commands::Associations(args) => memory::associations(args, &ctx).await,
        Commands::Reflect(args) => memory::reflect(args, &ctx).await,
        Commands::Importance(args) => memory::importance(args, &ctx).await,
        Commands::Related(args) => memory::related(args, &ctx).await,
        Commands::Turn(args) => conversation::turn(args, &ctx).await,
        Commands::History(args) => conversation::history(args, &ctx).await,
        Commands::Summarize(args) => conversation::summarize(args, &ctx).await,
        Commands::SearchTurns(args) => conversation::search(args, &ctx).await,
        Commands::Capture(args) => learning::capture(args, &ctx).await,
        Commands::Expand(args) => learning::expand(args, &ctx).await,
        Commands::Reinforce(args) => learning::reinforce(args, &ctx).await,
        Commands::Progress(args) => learning::progress(args, &ctx).await,
        Commands::Path(args) => learning::path(args, &ctx).await,
        Commands::Consolidate(args) => knowledge::consolidate(args, &ctx).await,
        Commands::Organize(args) => knowledge::organize(args, &ctx).await,
        Commands::Stats => memory::stats(&ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
