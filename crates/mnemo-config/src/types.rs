//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [storage]                # database location
//! [embedding]              # embedding provider + timeout
//! [embedding.openai]       # OpenAI-compatible endpoint settings
//! [recall]                 # default limits and relevance cutoff
//! [learning]               # capture/expansion defaults
//! [consolidation]          # merge defaults
//! [logging]                # console + file logging
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// Maps to the full TOML config file. All sections are optional so that
/// partial configs (e.g., project-local overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MnemoConfig {
    /// Storage location.
    pub storage: Option<StorageConfig>,

    /// Embedding provider configuration.
    pub embedding: Option<EmbeddingConfig>,

    /// Recall defaults.
    pub recall: Option<RecallConfig>,

    /// Incremental-learning defaults.
    pub learning: Option<LearningConfig>,

    /// Consolidation defaults.
    pub consolidation: Option<ConsolidationConfig>,

    /// Logging configuration.
    pub logging: Option<LoggingConfig>,
}

impl MnemoConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: MnemoConfig = toml::from_str(toml_str)
            .map_err(|source| ConfigError::Parse { path: None, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: MnemoConfig) {
        if other.storage.is_some() {
            self.storage = other.storage;
        }

        if other.embedding.is_some() {
            self.embedding = other.embedding;
        }

        if other.recall.is_some() {
            self.recall = other.recall;
        }

        if other.learning.is_some() {
            self.learning = other.learning;
        }

        if other.consolidation.is_some() {
            self.consolidation = other.consolidation;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Reject values that parse but cannot be used.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref embedding) = self.embedding
            && embedding.timeout_ms == 0
        {
            return Err(invalid("embedding.timeout_ms", "must be greater than zero"));
        }

        if let Some(ref recall) = self.recall {
            if !(0.0..=1.0).contains(&recall.min_relevance) {
                return Err(invalid("recall.min_relevance", "must be between 0.0 and 1.0"));
            }
            if recall.default_limit == 0 {
                return Err(invalid("recall.default_limit", "must be greater than zero"));
            }
        }

        if let Some(ref learning) = self.learning
            && !(1..=10).contains(&learning.default_expand_importance)
        {
            return Err(invalid(
                "learning.default_expand_importance",
                "must be between 1 and 10",
            ));
        }

        if let Some(ref consolidation) = self.consolidation
            && !(0.0..=1.0).contains(&consolidation.default_threshold)
        {
            return Err(invalid(
                "consolidation.default_threshold",
                "must be between 0.0 and 1.0",
            ));
        }

        Ok(())
    }

    /// Storage section or its defaults.
    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    /// Embedding section or its defaults.
    pub fn embedding(&self) -> EmbeddingConfig {
        self.embedding.clone().unwrap_or_default()
    }

    /// Recall section or its defaults.
    pub fn recall(&self) -> RecallConfig {
        self.recall.clone().unwrap_or_default()
    }

    /// Learning section or its defaults.
    pub fn learning(&self) -> LearningConfig {
        self.learning.clone().unwrap_or_default()
    }

    /// Consolidation section or its defaults.
    pub fn consolidation(&self) -> ConsolidationConfig {
        self.consolidation.clone().unwrap_or_default()
    }

    /// Logging section or its defaults.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Storage configuration.
///
/// ```toml
/// [storage]
/// database = "~/.local/share/mnemo/memory.db"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database. Relative paths resolve against `data_dir`.
    pub database: Option<PathBuf>,
    /// Data directory for the database and log files.
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Effective data directory: configured value or the platform default.
    pub fn effective_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(crate::discovery::data_dir)
    }

    /// Effective database path.
    pub fn effective_database(&self) -> PathBuf {
        let data_dir = self.effective_data_dir();
        match self.database {
            Some(ref db) if db.is_absolute() => db.clone(),
            Some(ref db) => data_dir.join(db),
            None => data_dir.join("memory.db"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Environment variable consulted when no API key is configured.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Embedding provider configuration.
///
/// Default is the deterministic mock embedder so that a fresh install works
/// offline; semantic ranking then only recognises identical text.
///
/// ```toml
/// [embedding]
/// provider = "openai"       # "openai" or "mock"
/// dimensions = 1536
/// timeout_ms = 5000
///
/// [embedding.openai]
/// model = "text-embedding-3-small"
/// base_url = "http://localhost:11434/v1"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider: "openai" or "mock".
    pub provider: EmbeddingProvider,
    /// Output embedding dimensions. Default depends on provider.
    pub dimensions: Option<usize>,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// OpenAI-specific embedding settings.
    pub openai: Option<EmbeddingOpenAiConfig>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Mock,
            dimensions: None,
            timeout_ms: 5000,
            openai: None,
        }
    }
}

impl EmbeddingConfig {
    /// Effective dimensions for the configured provider.
    pub fn effective_dimensions(&self) -> usize {
        if let Some(d) = self.dimensions {
            return d;
        }
        match self.provider {
            EmbeddingProvider::OpenAi => self
                .openai
                .as_ref()
                .and_then(|c| c.dimensions)
                .unwrap_or(1536),
            EmbeddingProvider::Mock => 384,
        }
    }

    /// API key from the config file, falling back to `OPENAI_API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.openai
            .as_ref()
            .and_then(|c| c.api_key.clone())
            .filter(|k| !k.is_empty())
            .or_else(|| {
                std::env::var(OPENAI_API_KEY_ENV)
                    .ok()
                    .filter(|k| !k.is_empty())
            })
    }

    /// Whether the config file itself holds an API key.
    pub fn has_plaintext_api_key(&self) -> bool {
        self.openai
            .as_ref()
            .and_then(|c| c.api_key.as_ref())
            .is_some_and(|k| !k.is_empty())
    }
}

/// Supported embedding providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible embeddings API.
    OpenAi,
    /// Deterministic mock embedder.
    Mock,
}

impl EmbeddingProvider {
    /// Provider name as understood by the embedder factory.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Mock => "mock",
        }
    }
}

/// OpenAI embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingOpenAiConfig {
    /// Model name. Default: "text-embedding-3-small".
    pub model: String,
    /// Override dimensions (OpenAI supports reduced output).
    pub dimensions: Option<usize>,
    /// Custom base URL (for proxies and local gateways).
    pub base_url: Option<String>,
    /// API key (prefer the environment variable).
    pub api_key: Option<String>,
}

impl Default for EmbeddingOpenAiConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: None,
            base_url: None,
            api_key: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recall Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Recall defaults.
///
/// ```toml
/// [recall]
/// default_limit = 20
/// min_relevance = 0.3
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// Limit applied when a query does not specify one.
    pub default_limit: usize,
    /// Minimum similarity for a semantic conversation match (0.0–1.0).
    pub min_relevance: f32,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            min_relevance: 0.3,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Learning Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Incremental-learning defaults.
///
/// ```toml
/// [learning]
/// default_expand_importance = 7
/// staleness_days = 7
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Importance given to an expansion that does not specify one.
    pub default_expand_importance: u8,
    /// Days without use after which a learning needs reinforcement.
    pub staleness_days: u32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            default_expand_importance: 7,
            staleness_days: 7,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Consolidation Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Consolidation defaults.
///
/// ```toml
/// [consolidation]
/// default_threshold = 0.85
/// default_limit = 20
/// organize_limit = 10
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Similarity threshold used when the caller gives none.
    pub default_threshold: f32,
    /// Candidate cap for consolidation.
    pub default_limit: usize,
    /// Match cap for organize.
    pub organize_limit: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            default_threshold: 0.85,
            default_limit: 20,
            organize_limit: 10,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default console filter when neither `-v` nor `RUST_LOG` is given.
    pub level: String,
    /// Whether to write a daily rolling JSON log file.
    pub file: bool,
    /// Directory for log files. Defaults to `<data_dir>/logs`.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: true,
            dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config = MnemoConfig::new();
        assert!(config.storage.is_none());
        assert!(config.embedding.is_none());
        assert_eq!(config.recall().default_limit, 20);
        assert_eq!(config.learning().staleness_days, 7);
        assert_eq!(config.embedding().timeout_ms, 5000);
    }

    #[test]
    fn test_parse_full() {
        let toml = r#"
[storage]
database = "/tmp/mnemo.db"

[embedding]
provider = "openai"
timeout_ms = 2500

[embedding.openai]
model = "text-embedding-3-large"
base_url = "http://localhost:11434/v1"

[recall]
default_limit = 50
min_relevance = 0.5

[learning]
default_expand_importance = 6
staleness_days = 14

[consolidation]
default_threshold = 0.9

[logging]
level = "debug"
file = false
"#;
        let config = MnemoConfig::from_toml(toml).unwrap();
        assert_eq!(
            config.storage().effective_database(),
            PathBuf::from("/tmp/mnemo.db")
        );
        let embedding = config.embedding();
        assert_eq!(embedding.provider, EmbeddingProvider::OpenAi);
        assert_eq!(embedding.timeout_ms, 2500);
        assert_eq!(
            embedding.openai.as_ref().unwrap().model,
            "text-embedding-3-large"
        );
        assert_eq!(embedding.effective_dimensions(), 1536);
        assert_eq!(config.recall().default_limit, 50);
        assert_eq!(config.learning().default_expand_importance, 6);
        assert_eq!(config.consolidation().default_threshold, 0.9);
        assert_eq!(config.consolidation().organize_limit, 10);
        assert!(!config.logging().file);
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let config = MnemoConfig::from_toml("[recall]\nmin_relevance = 0.7\n").unwrap();
        let recall = config.recall();
        assert_eq!(recall.default_limit, 20);
        assert!((recall.min_relevance - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let err = MnemoConfig::from_toml("[consolidation]\ndefault_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "consolidation.default_threshold"));

        let err = MnemoConfig::from_toml("[learning]\ndefault_expand_importance = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = MnemoConfig::from_toml("[embedding]\ntimeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_merge_overrides_sections() {
        let mut base = MnemoConfig::from_toml("[recall]\ndefault_limit = 5\n[learning]\nstaleness_days = 3\n").unwrap();
        let overlay = MnemoConfig::from_toml("[recall]\ndefault_limit = 9\n").unwrap();
        base.merge(overlay);
        assert_eq!(base.recall().default_limit, 9);
        assert_eq!(base.learning().staleness_days, 3);
    }

    #[test]
    fn test_roundtrip_toml() {
        let mut config = MnemoConfig::new();
        config.recall = Some(RecallConfig {
            default_limit: 7,
            min_relevance: 0.25,
        });
        let text = config.to_toml().unwrap();
        let parsed = MnemoConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.recall().default_limit, 7);
    }

    #[test]
    fn test_relative_database_resolves_against_data_dir() {
        let storage = StorageConfig {
            database: Some(PathBuf::from("custom.db")),
            data_dir: Some(PathBuf::from("/var/lib/mnemo")),
        };
        assert_eq!(
            storage.effective_database(),
            PathBuf::from("/var/lib/mnemo/custom.db")
        );

        let storage = StorageConfig {
            database: None,
            data_dir: Some(PathBuf::from("/var/lib/mnemo")),
        };
        assert_eq!(
            storage.effective_database(),
            PathBuf::from("/var/lib/mnemo/memory.db")
        );
    }

    #[test]
    fn test_plaintext_api_key_detection() {
        let config = MnemoConfig::from_toml(
            "[embedding]\nprovider = \"openai\"\n[embedding.openai]\napi_key = \"sk-secret\"\n",
        )
        .unwrap();
        let embedding = config.embedding();
        assert!(embedding.has_plaintext_api_key());
        assert_eq!(embedding.resolve_api_key().as_deref(), Some("sk-secret"));
        assert_eq!(embedding.provider.as_str(), "openai");
    }
}
