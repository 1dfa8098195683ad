//! CLI command handlers.

pub mod config;
pub mod conversation;
pub mod knowledge;
pub mod learning;
pub mod memory;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use console::Style;
use serde::Serialize;

use mnemo_config::MnemoConfig;
use mnemo_embed::EmbedderSpec;
use mnemo_memory::{DegradedIndexWarning, EngineSettings, Importance, MemoryEngine};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration.
    pub config: MnemoConfig,
    /// Config files that contributed to `config`.
    pub sources: Vec<PathBuf>,
    /// Database path given on the command line.
    pub db_override: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Database path: `--db`, then `[storage]`, then the platform data dir.
    pub fn database_path(&self) -> PathBuf {
        self.db_override
            .clone()
            .unwrap_or_else(|| self.config.storage().effective_database())
    }

    /// Open the engine with the configured embedder and settings.
    pub fn open_engine(&self) -> Result<MemoryEngine> {
        let path = self.database_path();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let embedder = mnemo_embed::build_embedder(&embedder_spec(&self.config))
            .map_err(|e| anyhow::anyhow!("Failed to build embedder: {e}"))?;
        let settings = engine_settings(&self.config)?;

        if self.verbose {
            eprintln!(
                "{}",
                Style::new().dim().apply_to(format!(
                    "Database: {} (embedder: {})",
                    path.display(),
                    embedder.name()
                ))
            );
        }

        MemoryEngine::open(&path, embedder, settings)
            .with_context(|| format!("Failed to open {}", path.display()))
    }
}

/// Map the `[embedding]` section onto the provider-agnostic spec.
pub fn embedder_spec(config: &MnemoConfig) -> EmbedderSpec {
    let embedding = config.embedding();
    let openai = embedding.openai.clone().unwrap_or_default();
    EmbedderSpec {
        provider: embedding.provider.as_str().to_string(),
        api_key: embedding.resolve_api_key(),
        model: Some(openai.model),
        base_url: openai.base_url,
        dimensions: Some(embedding.effective_dimensions()),
    }
}

/// Map the recall, learning and consolidation sections onto engine settings.
pub fn engine_settings(config: &MnemoConfig) -> Result<EngineSettings> {
    let recall = config.recall();
    let learning = config.learning();
    let consolidation = config.consolidation();
    let embedding = config.embedding();

    Ok(EngineSettings {
        recall_limit: recall.default_limit,
        min_relevance: recall.min_relevance,
        expand_importance: Importance::new(i64::from(learning.default_expand_importance))
            .context("[learning] default_expand_importance")?,
        staleness: chrono::Duration::days(i64::from(learning.staleness_days)),
        consolidation_threshold: consolidation.default_threshold,
        consolidation_limit: consolidation.default_limit,
        organize_limit: consolidation.organize_limit,
        embed_timeout: Duration::from_millis(embedding.timeout_ms),
        ..EngineSettings::default()
    })
}

/// Parse an RFC 3339 timestamp argument.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("'{}' is not an RFC 3339 timestamp", value))
}

/// Pretty-print `value` as JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a bold heading with a rule underneath.
pub fn print_header(title: &str) {
    println!("{}", console::style(title).bold());
    println!("{}", Style::new().dim().apply_to("─".repeat(50)));
}

/// Report degraded-index warnings on stderr.
pub fn print_warnings(warnings: &[DegradedIndexWarning]) {
    let yellow = Style::new().yellow();
    for warning in warnings {
        eprintln!("{} {}", yellow.apply_to("Warning:"), warning);
    }
}

/// Truncate a string for single-line display.
pub fn truncate(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max_len {
        s
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

/// Comma-join a label set, or a dim dash when empty.
pub fn labels<'a>(values: impl IntoIterator<Item = &'a String>) -> String {
    let joined = values
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        Style::new().dim().apply_to("-").to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a fairly long line", 10), "a fairly...");
        assert_eq!(truncate("two\nlines", 20), "two lines");
    }

    #[test]
    fn test_engine_settings_from_config() {
        let config = MnemoConfig::from_toml(
            r#"
            [recall]
            default_limit = 5
            min_relevance = 0.5

            [learning]
            default_expand_importance = 6
            staleness_days = 3

            [consolidation]
            default_threshold = 0.9
            "#,
        )
        .unwrap();

        let settings = engine_settings(&config).unwrap();
        assert_eq!(settings.recall_limit, 5);
        assert_eq!(settings.min_relevance, 0.5);
        assert_eq!(settings.expand_importance.get(), 6);
        assert_eq!(settings.staleness, chrono::Duration::days(3));
        assert_eq!(settings.consolidation_threshold, 0.9);
        assert_eq!(settings.organize_limit, 10);
    }

    #[test]
    fn test_embedder_spec_defaults_to_mock() {
        let spec = embedder_spec(&MnemoConfig::new());
        assert_eq!(spec.provider, "mock");
        assert_eq!(spec.dimensions, Some(384));
    }

    #[test]
    fn test_parse_timestamp() {
        let t = parse_timestamp("2024-03-01T12:00:00+02:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert!(parse_timestamp("yesterday").is_err());
    }
}
