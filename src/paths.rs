//! Settings and log file locations.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment override for the configuration directory
pub const CONFIG_DIR_ENV: &str = "ANIMPLAY_CONFIG_DIR";

/// Name of the settings file
pub const SETTINGS_FILE: &str = "animplay.json";

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args -> ENV var (ANIMPLAY_CONFIG_DIR) -> None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. ANIMPLAY_CONFIG_DIR environment variable
/// 3. Current directory IF it already holds animplay files
/// 4. Platform config directory from dirs-next
///
/// Platform paths:
/// - Linux: ~/.config/animplay/{name}
/// - macOS: ~/Library/Application Support/animplay/{name}
/// - Windows: %APPDATA%\animplay\{name}
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    resolve_dir(config, dirs_next::config_dir()).join(name)
}

/// Get path to a data file (logs)
///
/// Same priority as [`config_file`], falling back to the platform data
/// directory (~/.local/share/animplay on Linux).
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    resolve_dir(config, dirs_next::data_dir()).join(name)
}

/// Create the directory a file will be written to
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Check if any animplay files exist in the given directory
fn has_local_files(dir: &Path) -> bool {
    [SETTINGS_FILE, "animplay.log"]
        .iter()
        .any(|f| dir.join(f).exists())
}

fn resolve_dir(config: &PathConfig, platform: Option<PathBuf>) -> PathBuf {
    // Priority 1: Custom directory from CLI or ENV
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }

    // Priority 2: Local folder IF files exist there
    if let Ok(current_dir) = std::env::current_dir()
        && has_local_files(&current_dir)
    {
        return current_dir;
    }

    // Priority 3: Platform-specific directory
    if let Some(dir) = platform {
        return dir.join("animplay");
    }

    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_with_custom_dir() {
        let config = PathConfig {
            config_dir: Some(PathBuf::from("/custom")),
        };
        assert_eq!(config_file("test.json", &config), PathBuf::from("/custom/test.json"));
        assert_eq!(data_file("animplay.log", &config), PathBuf::from("/custom/animplay.log"));
    }

    #[test]
    fn test_cli_dir_wins() {
        let config = PathConfig::from_env_and_cli(Some(PathBuf::from("/from-cli")));
        assert_eq!(config.config_dir, Some(PathBuf::from("/from-cli")));
    }

    #[test]
    fn test_ensure_parent_creates_directories() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("nested/deeper/animplay.json");
        ensure_parent(&file).unwrap();
        assert!(file.parent().unwrap().is_dir());
    }
}
