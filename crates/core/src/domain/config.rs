//! Persisted soundboard settings
//!
//! This module provides:
//! - `Settings`, the values the soundboard exchanges with its store
//! - `ConfigManager`, which reads and writes them as TOML under the user's
//!   config directory
//!
//! The soundboard core never touches the file itself: the binary loads settings
//! and applies them, and reads them back before saving.

use crate::domain::playback::clamp_volume;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How stored bindings combine with the F1..F10 defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HotkeyMode {
    /// Only the F1..F10 auto-assignment
    Default,
    /// Only the stored bindings
    Custom,
    /// Defaults first, stored bindings override
    #[default]
    Merged,
}

/// Soundboard settings as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Output device id (None = not chosen yet)
    pub output_device: Option<String>,

    /// Root of the sound library
    pub sounds_dir: PathBuf,

    /// Playback volume in [0.0, 1.0]
    pub volume: f32,

    /// Key combo -> sound name
    pub hotkeys: BTreeMap<String, String>,

    pub hotkey_mode: HotkeyMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_device: None,
            sounds_dir: PathBuf::from("sounds"),
            volume: 1.0,
            hotkeys: BTreeMap::new(),
            hotkey_mode: HotkeyMode::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading settings");

        let contents = fs::read_to_string(path).await?;
        let mut settings: Self = toml::from_str(&contents)?;
        settings.clamp_volume();
        settings.validate()?;

        debug!("Settings loaded successfully");
        Ok(settings)
    }

    /// Save settings to a TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving settings");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Settings saved successfully");
        Ok(())
    }

    /// Pull an out-of-range volume back into `[0.0, 1.0]`
    pub fn clamp_volume(&mut self) {
        let clamped = clamp_volume(self.volume);
        if clamped != self.volume {
            warn!(stored = self.volume, used = clamped, "Volume out of range, clamped");
            self.volume = clamped;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hotkeys.keys().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::Invalid("empty hotkey combo".to_string()));
        }
        Ok(())
    }
}

/// Manages the settings file at `~/.config/cueboard/config.toml`
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");
        Self {
            config_dir,
            config_path,
        }
    }

    /// Use an explicit file instead of the default location
    pub fn with_path(config_path: PathBuf) -> Self {
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            config_dir,
            config_path,
        }
    }

    /// Returns `~/.config/cueboard` on Linux/Mac and `%APPDATA%\cueboard` on Windows
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("cueboard"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load settings
    ///
    /// A missing file yields defaults. A corrupt file is backed up to
    /// `config.toml.corrupt` and defaults are returned.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Settings {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Settings file not found, using defaults"
            );
            return Settings::default();
        }

        match Settings::load_from_file(&self.config_path).await {
            Ok(settings) => settings,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load settings, using defaults"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt settings"
                    );
                }

                Settings::default()
            }
        }
    }

    #[instrument(skip(self, settings))]
    pub async fn save(&self, settings: &Settings) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        settings.save_to_file(&self.config_path).await
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
