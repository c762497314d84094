//! Log-file housekeeping for the bridge binary.
//!
//! Stdout belongs to the hosted engine, so diagnostics always go to a file.
//! Subscriber installation lives in the binary crate; this module only owns
//! paths, rotation and level names.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Size at which the current log is rotated (10 MB).
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Rotated generations kept next to the live log.
pub const DEFAULT_MAX_LOG_FILES: u32 = 5;

/// File name of the live log.
pub const LOG_FILE_NAME: &str = "turnstile.log";

/// Fallback log path when no platform directory is available.
pub fn default_log_file_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home)
            .join(".local/share/turnstile/logs")
            .join(LOG_FILE_NAME),
        None => std::env::temp_dir().join("turnstile").join(LOG_FILE_NAME),
    }
}

/// Create the parent directory of `log_path` if needed.
pub fn ensure_log_dir(log_path: &Path) -> io::Result<()> {
    match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Rotate `log_path` once it reaches `max_size` bytes.
///
/// ```text
///   turnstile.log   -> turnstile.log.1
///   turnstile.log.1 -> turnstile.log.2
///   ...
///   turnstile.log.<max_files> is deleted
/// ```
pub fn rotate_log_files(log_path: &Path, max_size: u64, max_files: u32) -> io::Result<()> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if size < max_size || max_files == 0 {
        return Ok(());
    }

    let oldest = rotated_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for generation in (1..max_files).rev() {
        let from = rotated_path(log_path, generation);
        if from.exists() {
            fs::rename(&from, rotated_path(log_path, generation + 1))?;
        }
    }
    fs::rename(log_path, rotated_path(log_path, 1))
}

/// Normalise a level name to a `tracing` filter directive.
///
/// Unknown names fall back to `"info"`.
pub fn log_level_to_filter(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

fn rotated_path(base: &Path, generation: u32) -> PathBuf {
    let name = base.file_name().unwrap_or_default().to_string_lossy();
    let parent = base.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{name}.{generation}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_uses_log_file_name() {
        let path = default_log_file_path();
        assert!(path.ends_with(LOG_FILE_NAME), "got: {path:?}");
    }

    #[test]
    fn rotated_path_appends_generation() {
        let base = Path::new("/var/log/turnstile.log");
        assert_eq!(
            rotated_path(base, 2),
            PathBuf::from("/var/log/turnstile.log.2")
        );
    }

    #[test]
    fn rotate_ignores_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join(LOG_FILE_NAME);
        rotate_log_files(&log, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES).unwrap();
        assert!(!log.exists());
    }

    #[test]
    fn rotate_keeps_small_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join(LOG_FILE_NAME);
        fs::write(&log, "step reported").unwrap();
        rotate_log_files(&log, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES).unwrap();
        assert!(log.exists());
    }

    #[test]
    fn rotate_cascades_and_drops_oldest() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join(LOG_FILE_NAME);
        fs::write(dir.path().join("turnstile.log.1"), "gen1").unwrap();
        fs::write(dir.path().join("turnstile.log.2"), "gen2").unwrap();
        fs::write(&log, "x".repeat(128)).unwrap();

        rotate_log_files(&log, 64, 2).unwrap();

        assert!(!log.exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("turnstile.log.1")).unwrap(),
            "x".repeat(128)
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("turnstile.log.2")).unwrap(),
            "gen1"
        );
        assert!(!dir.path().join("turnstile.log.3").exists());
    }

    #[test]
    fn ensure_log_dir_creates_parents_idempotently() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("a").join("b").join(LOG_FILE_NAME);
        ensure_log_dir(&log).unwrap();
        ensure_log_dir(&log).unwrap();
        assert!(dir.path().join("a").join("b").is_dir());
    }

    #[test]
    fn level_names_map_to_filters() {
        assert_eq!(log_level_to_filter("TRACE"), "trace");
        assert_eq!(log_level_to_filter("Debug"), "debug");
        assert_eq!(log_level_to_filter("warning"), "warn");
        assert_eq!(log_level_to_filter("error"), "error");
        assert_eq!(log_level_to_filter("verbose"), "info");
    }
}
