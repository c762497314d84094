use std::path::PathBuf;

use crate::error::PlatformError;

/// Per-user directories the bridge reads from and writes to.
pub trait PlatformPaths: Send + Sync {
    /// Configuration directory (`~/.config/turnstile`).
    fn config_dir(&self) -> PathBuf;
    /// Data directory (`~/.local/share/turnstile`).
    fn data_dir(&self) -> PathBuf;
    /// Log directory (`<data_dir>/logs`).
    fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }
    /// The user's home directory.
    fn home_dir(&self) -> PathBuf;
}

/// [`PlatformPaths`] rooted at the user's home directory.
pub struct DefaultPaths {
    home: PathBuf,
}

impl DefaultPaths {
    /// Resolve the home directory via `dirs`, falling back to `$HOME`.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Path` if neither source yields a directory.
    pub fn new() -> Result<Self, PlatformError> {
        let home = dirs::home_dir()
            .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
            .ok_or_else(|| PlatformError::Path("could not determine home directory".into()))?;
        Ok(Self { home })
    }

    /// Root every directory under `home` instead of the real one.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }
}

impl PlatformPaths for DefaultPaths {
    fn config_dir(&self) -> PathBuf {
        self.home.join(".config").join("turnstile")
    }

    fn data_dir(&self) -> PathBuf {
        self.home.join(".local").join("share").join("turnstile")
    }

    fn home_dir(&self) -> PathBuf {
        self.home.clone()
    }
}
