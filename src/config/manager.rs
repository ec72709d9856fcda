use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Default bytes of terminal output kept for a surface that has not drained yet
pub const DEFAULT_OUTPUT_BUFFER_BYTES: usize = 256 * 1024;

/// Terminal grid and buffering settings
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct TerminalSettings {
    pub cell_width_px: u32,
    pub cell_height_px: u32,
    pub min_cols: u16,
    pub min_rows: u16,
    pub output_buffer_bytes: usize,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            cell_width_px: 9,
            cell_height_px: 20,
            min_cols: 10,
            min_rows: 2,
            output_buffer_bytes: DEFAULT_OUTPUT_BUFFER_BYTES,
        }
    }
}

/// Workspace behaviour settings
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceSettings {
    /// Open a file in a tab right after the backend confirms its creation
    pub open_created_files: bool,
    /// Forget expanded folders that are missing from a refreshed tree
    pub prune_missing_expanded: bool,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            open_created_files: true,
            prune_missing_expanded: true,
        }
    }
}

/// Main configuration structure
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub terminal: TerminalSettings,
    pub workspace: WorkspaceSettings,
}

impl Settings {
    /// Validates the settings values
    pub fn validate(&self) -> Result<()> {
        let t = &self.terminal;
        if t.cell_width_px == 0 || t.cell_height_px == 0 {
            return Err(AppError::ValidationError(
                "Terminal cell size must be greater than 0".to_string(),
            ));
        }
        if t.min_cols == 0 || t.min_rows == 0 {
            return Err(AppError::ValidationError(
                "Terminal minimum grid must be at least 1x1".to_string(),
            ));
        }
        if t.output_buffer_bytes == 0 {
            return Err(AppError::ValidationError(
                "Terminal output buffer cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads and persists [`Settings`] as TOML
pub struct SettingsManager {
    config_path: PathBuf,
    settings: Settings,
}

impl SettingsManager {
    /// Create a settings manager backed by the default config file
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::with_path(config_path)
    }

    /// Create a settings manager with a custom config path
    pub fn with_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let settings = Self::load_from_path(&config_path)?;

        Ok(Self {
            config_path,
            settings,
        })
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::ConfigError("Could not determine config directory".to_string()))?
            .join("ide-session");

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).map_err(|e| {
                AppError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        Ok(config_dir.join("config.toml"))
    }

    fn load_from_path(config_path: &Path) -> Result<Settings> {
        if !config_path.exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(config_path)
            .map_err(|e| AppError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let settings: Settings = toml::from_str(&content)
            .map_err(|e| AppError::ConfigError(format!("Failed to parse config file: {}", e)))?;
        settings.validate()?;

        Ok(settings)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings after validating them; call [`save`](Self::save) to persist
    pub fn update(&mut self, settings: Settings) -> Result<()> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    /// Persist current settings to disk
    pub fn save(&self) -> Result<()> {
        let toml = toml::to_string_pretty(&self.settings)
            .map_err(|e| AppError::ConfigError(format!("Failed to serialize config: {}", e)))?;
        fs::write(&self.config_path, toml)
            .map_err(|e| AppError::ConfigError(format!("Failed to write config: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SettingsManager::with_path(dir.path().join("config.toml")).unwrap();
        assert_eq!(manager.settings(), &Settings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[terminal]\ncell_width_px = 8\n").unwrap();

        let manager = SettingsManager::with_path(&path).unwrap();
        assert_eq!(manager.settings().terminal.cell_width_px, 8);
        assert_eq!(manager.settings().terminal.cell_height_px, 20);
        assert!(manager.settings().workspace.open_created_files);
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut manager = SettingsManager::with_path(&path).unwrap();
        let mut settings = Settings::default();
        settings.workspace.open_created_files = false;
        manager.update(settings.clone()).unwrap();
        manager.save().unwrap();

        let reloaded = SettingsManager::with_path(&path).unwrap();
        assert_eq!(reloaded.settings(), &settings);
    }

    #[test]
    fn rejects_zero_cell_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[terminal]\ncell_height_px = 0\n").unwrap();
        assert!(matches!(
            SettingsManager::with_path(&path),
            Err(AppError::ValidationError(_))
        ));
    }
}
