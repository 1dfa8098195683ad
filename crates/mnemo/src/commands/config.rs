//! Config command - configuration management.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::style;

use mnemo_config::{
    ConfigError, ConsolidationConfig, EmbeddingConfig, LearningConfig, LoggingConfig, MnemoConfig,
    RecallConfig, StorageConfig,
};

use super::{Context, embedder_spec, engine_settings, print_json};

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration
    Show,

    /// Show the user configuration file path
    Path,

    /// Write a config file populated with the defaults
    Init {
        /// Create project-local config (./mnemo.toml) instead of user config
        #[arg(long)]
        local: bool,
    },
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Path => cmd_path(),
        ConfigCommand::Init { local } => cmd_init(local),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    if ctx.json_output {
        return print_json(&ctx.config);
    }

    println!("# mnemo Configuration\n");

    if ctx.sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &ctx.sources {
            println!("  {}", source.display());
        }
        println!();
    }

    let spec = embedder_spec(&ctx.config);
    let settings = engine_settings(&ctx.config)?;
    let key_status = if spec.provider != "openai" {
        "(not needed)"
    } else if spec.api_key.is_some() {
        "(key ✓)"
    } else {
        "(no key)"
    };

    println!("Storage:");
    println!("  database: {}", ctx.database_path().display());
    println!();
    println!("Embedding:");
    println!(
        "  provider: {} {}",
        style(&spec.provider).cyan(),
        key_status
    );
    println!("  dimensions: {}", spec.dimensions.unwrap_or_default());
    println!("  timeout: {} ms", settings.embed_timeout.as_millis());
    println!();
    println!("Recall:");
    println!("  default_limit: {}", settings.recall_limit);
    println!("  min_relevance: {}", settings.min_relevance);
    println!();
    println!("Learning:");
    println!("  default_expand_importance: {}", settings.expand_importance);
    println!("  staleness_days: {}", settings.staleness.num_days());
    println!();
    println!("Consolidation:");
    println!("  default_threshold: {}", settings.consolidation_threshold);
    println!("  default_limit: {}", settings.consolidation_limit);
    println!("  organize_limit: {}", settings.organize_limit);
    Ok(())
}

fn cmd_path() -> Result<()> {
    if let Some(path) = mnemo_config::user_config_path() {
        println!("{}", path.display());
    } else {
        eprintln!("Could not determine config directory");
    }
    Ok(())
}

fn cmd_init(local: bool) -> Result<()> {
    let path = if local {
        mnemo_config::project_config_path()
    } else {
        mnemo_config::user_config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
    };

    let defaults = MnemoConfig {
        storage: Some(StorageConfig::default()),
        embedding: Some(EmbeddingConfig::default()),
        recall: Some(RecallConfig::default()),
        learning: Some(LearningConfig::default()),
        consolidation: Some(ConsolidationConfig::default()),
        logging: Some(LoggingConfig::default()),
    };
    match mnemo_config::write_new_config(&defaults, &path) {
        Ok(()) => println!("Created config file: {}", path.display()),
        Err(ConfigError::AlreadyExists(path)) => {
            println!("Config file already exists: {}", path.display())
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
