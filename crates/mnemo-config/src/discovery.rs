//! Locating, loading and writing mnemo config files.
//!
//! Without an explicit file, two layers are merged, later winning:
//! 1. user: `$MNEMO_CONFIG_DIR/config.toml`, else `<platform config dir>/mnemo/config.toml`
//! 2. project: `./mnemo.toml`
//!
//! An explicit file (`mnemo --config`, `MNEMO_CONFIG`) replaces both layers
//! and must exist. Every layer that exists must parse and validate; a broken
//! file is an error naming that file, never a silently skipped layer.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::{ConfigError, MnemoConfig, Result};

const PROJECT_CONFIG_FILE: &str = "mnemo.toml";
const USER_CONFIG_FILE: &str = "config.toml";
const APP_NAME: &str = "mnemo";

const CONFIG_DIR_ENV: &str = "MNEMO_CONFIG_DIR";
const DATA_DIR_ENV: &str = "MNEMO_DATA_DIR";

/// Where a layer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    User,
    Project,
    Explicit,
}

/// One candidate config file and whether it contributed.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    pub kind: LayerKind,
    pub path: PathBuf,
    pub loaded: bool,
}

/// Merged config plus the layers that were consulted, lowest precedence first.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: MnemoConfig,
    pub layers: Vec<ConfigLayer>,
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of the layers that were actually read.
    pub fn loaded_paths(&self) -> Vec<PathBuf> {
        self.layers
            .iter()
            .filter(|l| l.loaded)
            .map(|l| l.path.clone())
            .collect()
    }
}

/// Builder for a config load.
///
/// ```no_run
/// let loaded = mnemo_config::ConfigLoader::new().load()?;
/// println!("recall limit {}", loaded.config.recall().default_limit);
/// # Ok::<(), mnemo_config::ConfigError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    explicit: Option<PathBuf>,
    project_dir: Option<PathBuf>,
    user_dir: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use exactly this file instead of discovery. `None` keeps discovery.
    pub fn explicit_file(mut self, path: Option<PathBuf>) -> Self {
        self.explicit = path;
        self
    }

    /// Directory searched for `mnemo.toml` (default: the working directory).
    pub fn project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// Directory holding the user `config.toml` (default: [`user_config_dir`]).
    pub fn user_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_dir = Some(dir.into());
        self
    }

    /// Read, merge and validate the selected layers.
    pub fn load(&self) -> Result<LoadedConfig> {
        let mut config = MnemoConfig::new();
        let mut layers = Vec::new();

        if let Some(path) = &self.explicit {
            config.merge(read_config(path)?);
            layers.push(ConfigLayer {
                kind: LayerKind::Explicit,
                path: path.clone(),
                loaded: true,
            });
        } else {
            let user = self
                .user_dir
                .clone()
                .or_else(user_config_dir)
                .map(|d| d.join(USER_CONFIG_FILE));
            let project = self
                .project_dir
                .as_deref()
                .unwrap_or_else(|| Path::new("."))
                .join(PROJECT_CONFIG_FILE);

            let candidates = user
                .map(|p| (LayerKind::User, p))
                .into_iter()
                .chain(std::iter::once((LayerKind::Project, project)));
            for (kind, path) in candidates {
                let loaded = path.is_file();
                if loaded {
                    config.merge(read_config(&path)?);
                }
                layers.push(ConfigLayer { kind, path, loaded });
            }
        }

        config.validate()?;

        let mut warnings = Vec::new();
        if config.embedding.as_ref().is_some_and(|e| e.has_plaintext_api_key()) {
            warnings.push(
                "[embedding.openai] holds a plaintext API key; prefer OPENAI_API_KEY".to_string(),
            );
        }

        Ok(LoadedConfig {
            config,
            layers,
            warnings,
        })
    }
}

/// Parse and validate a single config file.
pub fn read_config(path: &Path) -> Result<MnemoConfig> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    MnemoConfig::from_toml(&contents).map_err(|e| e.in_path(path))
}

/// Write `config` to a file that must not exist yet, creating parent dirs.
pub fn write_new_config(config: &MnemoConfig, path: &Path) -> Result<()> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }

    let contents = config.to_toml()?;
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        Err(e) => return Err(write_err(e)),
    };
    file.write_all(contents.as_bytes()).map_err(write_err)
}

/// User config directory: `MNEMO_CONFIG_DIR`, then `<platform config dir>/mnemo`.
pub fn user_config_dir() -> Option<PathBuf> {
    non_empty_env(CONFIG_DIR_ENV).or_else(|| dirs::config_dir().map(|d| d.join(APP_NAME)))
}

/// Path of the user config file.
pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// Path of the project config file in the working directory.
pub fn project_config_path() -> PathBuf {
    PathBuf::from(PROJECT_CONFIG_FILE)
}

/// Data directory: `MNEMO_DATA_DIR`, then `<platform data dir>/mnemo`, then `./.mnemo`.
pub fn data_dir() -> PathBuf {
    non_empty_env(DATA_DIR_ENV)
        .or_else(|| dirs::data_dir().map(|d| d.join(APP_NAME)))
        .unwrap_or_else(|| PathBuf::from(".mnemo"))
}

fn non_empty_env(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
