use std::path::PathBuf;
use thiserror::Error;

/// Why the bridge configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly named config file does not exist.
    #[error("no config file at {0}")]
    NotFound(PathBuf),

    #[error("cannot write default config: {0}")]
    CreateDefault(String),

    #[error("malformed config: {0}")]
    Parse(String),

    /// A setting is out of range, e.g. `bridge.port = 0`.
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
