use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::ConfigError;
use crate::merge::merge_configs;
use crate::validate::validate;

/// Directory holding per-project overrides.
const PROJECT_DIR: &str = ".turnstile";

/// Content written into a newly-created default config file.
const DEFAULT_CONFIG_CONTENT: &str = r#"# turnstile configuration
# Uncomment and edit settings below to override defaults.

# [bridge]
# host = "127.0.0.1"
# port = 4712
# allow_terminate = true

# [events]
# filters = ["begin", "end", "error"]
# enabled = ["begin", "error"]

# [log]
# level = "info"
# file = "/path/to/turnstile.log"
"#;

/// Load and merge configuration.
///
/// 1. Reads the global config from `config_dir/config.toml`, creating it
///    with commented-out defaults when missing.
/// 2. Optionally reads `project_dir/.turnstile/config.toml`, walking upward.
/// 3. Merges `Config::default() <- global <- project`.
/// 4. Validates the merged result.
///
/// # Errors
///
/// Returns [`ConfigError`] on I/O failure, parse failure, or
/// validation failure.
pub fn load_config(config_dir: &Path, project_dir: Option<&Path>) -> Result<Config, ConfigError> {
    let global_path = config_dir.join("config.toml");

    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir)?;
    }

    if !global_path.exists() {
        std::fs::write(&global_path, DEFAULT_CONFIG_CONTENT)
            .map_err(|e| ConfigError::CreateDefault(e.to_string()))?;
        tracing::info!(path = %global_path.display(), "created default config");
    }

    let mut config = Config::default();

    let global_content = std::fs::read_to_string(&global_path)?;
    if has_non_comment_content(&global_content) {
        config = merge_configs(&config, &global_content)?;
    }

    if let Some(project_path) = project_dir.and_then(find_project_config) {
        tracing::debug!(path = %project_path.display(), "merging project config");
        let project_content = std::fs::read_to_string(&project_path)?;
        config = merge_configs(&config, &project_content)?;
    }

    first_violation(validate(&config))?;
    Ok(config)
}

/// Load a single explicitly-named config file over the defaults.
///
/// # Errors
///
/// Returns [`ConfigError::NotFound`] when `path` does not exist.
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let config = merge_configs(&Config::default(), &content)?;
    first_violation(validate(&config))?;
    Ok(config)
}

/// Parse a TOML string directly into a validated [`Config`].
///
/// # Errors
///
/// Returns [`ConfigError`] on parse or validation failure.
pub fn load_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    first_violation(validate(&config))?;
    Ok(config)
}

fn first_violation(result: Result<(), Vec<ConfigError>>) -> Result<(), ConfigError> {
    result.map_err(|errors| {
        errors
            .into_iter()
            .next()
            .unwrap_or_else(|| ConfigError::Validation {
                field: "unknown".to_string(),
                message: "validation failed".to_string(),
            })
    })
}

/// Walk from `start` upward looking for `.turnstile/config.toml`.
fn find_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_DIR).join("config.toml"))
        .find(|candidate| candidate.is_file())
}

/// Returns `true` when the content has at least one
/// non-empty, non-comment line.
fn has_non_comment_content(content: &str) -> bool {
    content.lines().any(|l| {
        let trimmed = l.trim();
        !trimmed.is_empty() && !trimmed.starts_with('#')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_config_creates_default_when_missing() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");

        let config = load_config(&cfg_dir, None).unwrap();
        assert_eq!(config, Config::default());
        assert!(cfg_dir.join("config.toml").exists());
    }

    #[test]
    fn load_config_reads_existing_global() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(cfg_dir.join("config.toml"), "[bridge]\nport = 5999\n").unwrap();

        let config = load_config(&cfg_dir, None).unwrap();
        assert_eq!(config.bridge.port, 5999);
        assert_eq!(config.bridge.host, "127.0.0.1");
    }

    #[test]
    fn load_config_merges_project_over_global() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            "[bridge]\nport = 5999\nallow_terminate = false\n",
        )
        .unwrap();

        let proj_dir = tmp.path().join("bot");
        let overrides = proj_dir.join(PROJECT_DIR);
        std::fs::create_dir_all(&overrides).unwrap();
        std::fs::write(overrides.join("config.toml"), "[bridge]\nport = 6001\n").unwrap();

        let config = load_config(&cfg_dir, Some(&proj_dir)).unwrap();
        assert_eq!(config.bridge.port, 6001);
        assert!(!config.bridge.allow_terminate);
    }

    #[test]
    fn load_config_rejects_invalid_merge() {
        let tmp = TempDir::new().unwrap();
        let cfg_dir = tmp.path().join("config");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            "[events]\nenabled = [\"unknown\"]\n",
        )
        .unwrap();

        let err = load_config(&cfg_dir, None).unwrap_err();
        assert!(err.to_string().contains("events.enabled"));
    }

    #[test]
    fn load_config_file_requires_existing_file() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("absent.toml");
        let err = load_config_file(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(p) if p == missing));
    }

    #[test]
    fn load_config_file_overlays_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bridge.toml");
        std::fs::write(&path, "[log]\nlevel = \"debug\"\n").unwrap();
        let config = load_config_file(&path).unwrap();
        assert_eq!(config.log.level.as_filter(), "debug");
        assert_eq!(config.bridge, Config::default().bridge);
    }

    #[test]
    fn load_from_str_parses_valid_toml() {
        let config = load_from_str("[bridge]\nhost = \"0.0.0.0\"\n").unwrap();
        assert_eq!(config.bridge.host, "0.0.0.0");
    }

    #[test]
    fn load_from_str_rejects_invalid_toml() {
        assert!(load_from_str("{{bad}}").is_err());
    }

    #[test]
    fn load_from_str_rejects_invalid_values() {
        assert!(load_from_str("[bridge]\nport = 0\n").is_err());
    }

    #[test]
    fn find_project_config_walks_up() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        let overrides = root.join(PROJECT_DIR);
        std::fs::create_dir_all(&overrides).unwrap();
        std::fs::write(overrides.join("config.toml"), "[bridge]\nport = 7000\n").unwrap();

        let deep = root.join("dialogs").join("main");
        std::fs::create_dir_all(&deep).unwrap();

        let found = find_project_config(&deep).expect("should find project config");
        assert!(found.ends_with(".turnstile/config.toml"));
    }

    #[test]
    fn default_config_content_is_comment_only() {
        assert!(!has_non_comment_content(DEFAULT_CONFIG_CONTENT));
    }

    #[test]
    fn has_non_comment_content_detects_values() {
        assert!(!has_non_comment_content(""));
        assert!(!has_non_comment_content("# comment\n"));
        assert!(has_non_comment_content("# comment\nport = 4\n"));
    }
}
