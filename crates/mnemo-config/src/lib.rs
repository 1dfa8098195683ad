//! Configuration system for the mnemo memory engine.
//!
//! Provides TOML-based configuration with:
//! - Storage, embedding, recall, learning and consolidation sections
//! - Config file layering (user config + project-local overrides, or one explicit file)
//! - API key resolution (config file → `OPENAI_API_KEY`)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigLayer, ConfigLoader, LayerKind, LoadedConfig, data_dir, project_config_path,
    read_config, user_config_dir, user_config_path, write_new_config,
};
pub use error::{ConfigError, Result};
pub use types::*;
