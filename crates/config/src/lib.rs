//! Configuration directory helpers for the ingest tools
//!
//! Config files live in ~/.config/ingest/ unless `INGEST_CONFIG_DIR` points
//! somewhere else.
//!
//! Call [`init`] at application startup to bootstrap the config directory.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Environment variable that relocates the config directory
pub const CONFIG_DIR_ENV: &str = "INGEST_CONFIG_DIR";

const APP_DIR: &str = "ingest";

/// Initialize the config directory.
///
/// Creates it if it doesn't exist. Call this once at application startup.
pub fn init() -> Result<PathBuf> {
    ensure_config_dir()
}

/// Get the config directory (`INGEST_CONFIG_DIR` or ~/.config/ingest/)
pub fn config_dir() -> Option<PathBuf> {
    resolve_config_dir(std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from))
}

fn resolve_config_dir(overridden: Option<PathBuf>) -> Option<PathBuf> {
    match overridden {
        Some(dir) if !dir.as_os_str().is_empty() => Some(dir),
        _ => dirs::config_dir().map(|p| p.join(APP_DIR)),
    }
}

/// Get the path to a file within the config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Load and parse a JSON config file from the config directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Check if a file exists in the config directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

/// Ensure the config directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_default_config_dir() {
        let dir = resolve_config_dir(None);
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("ingest"));
    }

    #[test]
    fn test_override_config_dir() {
        let dir = resolve_config_dir(Some(PathBuf::from("/srv/ingest-conf")));
        assert_eq!(dir, Some(PathBuf::from("/srv/ingest-conf")));

        // empty override falls back to the default
        let dir = resolve_config_dir(Some(PathBuf::new()));
        assert!(dir.unwrap().ends_with("ingest"));
    }

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
    }

    #[test]
    fn test_load_json_file() {
        let dir = std::env::temp_dir().join(format!("ingest-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sample.json");
        std::fs::write(&path, r#"{"name": "sweep"}"#).unwrap();

        let sample: Sample = load_json_file(&path).unwrap();
        assert_eq!(sample.name, "sweep");

        std::fs::write(&path, "not json").unwrap();
        let err = load_json_file::<Sample>(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
