use anyhow::Result;
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

use super::ExplorerConfig;

const APP_NAME: &str = "CloudExplorer";
const CONFIG_FILE: &str = "config.json";

/// Overrides the config file location when set.
pub const CONFIG_ENV_VAR: &str = "CLOUD_EXPLORER_CONFIG";

/// Returns the platform-specific configuration directory for the application.
pub fn get_config_directory() -> Option<PathBuf> {
    ProjectDirs::from("com", "cloudexplorer", APP_NAME)
        .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
}

/// Returns the full path to the configuration file, honoring `CLOUD_EXPLORER_CONFIG`.
pub fn get_config_file_path() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => get_config_directory().map(|dir| dir.join(CONFIG_FILE)),
    }
}

/// Loads the configuration from its default location.
pub fn load_config() -> Result<ExplorerConfig> {
    let config_path = get_config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    load_config_from(&config_path)
}

/// Loads the configuration at `config_path`.
/// If the file doesn't exist, it creates a default one.
/// If it cannot be parsed, it logs a warning and falls back to the defaults.
pub fn load_config_from(config_path: &Path) -> Result<ExplorerConfig> {
    if !config_path.exists() {
        tracing::info!(
            "Config file not found, creating default config at {:?}",
            config_path
        );
        let default_config = ExplorerConfig::default();
        save_config_to(&default_config, config_path)?;
        return Ok(default_config);
    }

    let config_content = fs::read_to_string(config_path)?;
    match serde_json::from_str::<ExplorerConfig>(&config_content) {
        Ok(config) => {
            tracing::info!("Loaded config from {:?}", config_path);
            Ok(config)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to parse config file at {:?}: {}. Falling back to default config.",
                config_path,
                e
            );
            Ok(ExplorerConfig::default())
        }
    }
}

/// Saves the configuration to its default location.
pub fn save_config(config: &ExplorerConfig) -> Result<()> {
    let config_path = get_config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    save_config_to(config, &config_path)
}

pub fn save_config_to(config: &ExplorerConfig, config_path: &Path) -> Result<()> {
    if let Some(config_dir) = config_path.parent() {
        if !config_dir.as_os_str().is_empty() && !config_dir.exists() {
            fs::create_dir_all(config_dir)?;
            tracing::info!("Created config directory: {:?}", config_dir);
        }
    }

    let config_json = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_json)?;
    tracing::info!("Saved config to {:?}", config_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashSet;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = load_config_from(&path).unwrap();

        assert_eq!(config, ExplorerConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn test_saved_config_is_loaded_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let config = ExplorerConfig {
            load_timeout_secs: 5,
            show_all: true,
            hidden_subscriptions: HashSet::from(["sub-dev".to_string()]),
            resource_types: Some(vec!["Microsoft.Web/sites".to_string()]),
            ..Default::default()
        };

        save_config_to(&config, &path).unwrap();

        assert_eq!(load_config_from(&path).unwrap(), config);
    }

    #[test]
    #[traced_test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "{ this is not json").unwrap();

        let config = load_config_from(&path).unwrap();

        assert_eq!(config, ExplorerConfig::default());
        assert!(logs_contain("Falling back to default config"));
    }

    #[test]
    #[serial]
    fn test_env_var_overrides_location() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.json");
        std::env::set_var(CONFIG_ENV_VAR, &path);

        let resolved = get_config_file_path();
        let config = load_config();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(resolved, Some(path.clone()));
        assert_eq!(config.unwrap(), ExplorerConfig::default());
        assert!(path.exists());
    }
}

// Platform-specific configuration paths for reference:
// macOS:   ~/Library/Application Support/com.cloudexplorer.CloudExplorer/
// Linux:   ~/.config/cloudexplorer/
// Windows: %APPDATA%/cloudexplorer/CloudExplorer/config/
