//! Configuration error types.

use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// `config init` target is already present; it is never overwritten.
    #[error("config file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("invalid TOML{}: {source}", in_file(.path))]
    Parse {
        path: Option<PathBuf>,
        source: toml::de::Error,
    },

    #[error("cannot encode config: {0}")]
    Encode(#[from] toml::ser::Error),

    /// A value parses but is outside its allowed range.
    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    /// Attach the file a parse error came from.
    pub(crate) fn in_path(self, path: &Path) -> Self {
        match self {
            Self::Parse { path: None, source } => Self::Parse {
                path: Some(path.to_path_buf()),
                source,
            },
            Self::InvalidValue { field, message } => Self::InvalidValue {
                field,
                message: format!("{} (in {})", message, path.display()),
            },
            other => other,
        }
    }
}

fn in_file(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" in {}", p.display()))
        .unwrap_or_default()
}
