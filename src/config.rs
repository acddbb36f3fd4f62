//! Settings
//!
//! Persisted add-on settings, stored as JSON next to the rules file. Command
//! line flags override what is loaded here.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;
use crate::rules::store::RULES_FILE_NAME;
use crate::threading::DEFAULT_WORKERS;

/// Name of the settings file inside the configuration directory
pub const SETTINGS_FILE_NAME: &str = "earcons.json";

/// Directory holding built-in clips, relative to the configuration directory
pub const SOUNDS_DIR_NAME: &str = "sounds";

/// Application settings that can be set via CLI or config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// The persisted on/off toggle
    pub enabled: bool,
    pub worker_threads: usize,
    /// Output device name; the system default when unset
    pub output_device: Option<String>,
    pub sounds_dir: Option<PathBuf>,
    pub rules_file: Option<PathBuf>,
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_threads: DEFAULT_WORKERS,
            output_device: None,
            sounds_dir: None,
            rules_file: None,
            log_level: LogLevel::Info,
            log_file: None,
        }
    }
}

impl Settings {
    /// Load settings from `path`
    ///
    /// A missing file yields the defaults. An unreadable or malformed one is
    /// an error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read settings {}", path.display()))
            }
        };
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        let settings: Settings = serde_json::from_str(&text)
            .with_context(|| format!("Malformed settings file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings to `path`, creating its directory
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, json).with_context(|| format!("Failed to write settings {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            anyhow::bail!("workerThreads must be at least 1");
        }
        Ok(())
    }

    /// Rules file to use, defaulting into `config_dir`
    pub fn rules_path(&self, config_dir: &Path) -> PathBuf {
        self.rules_file
            .clone()
            .unwrap_or_else(|| config_dir.join(RULES_FILE_NAME))
    }

    /// Built-in clip directory to use, defaulting into `config_dir`
    pub fn sounds_path(&self, config_dir: &Path) -> PathBuf {
        self.sounds_dir
            .clone()
            .unwrap_or_else(|| config_dir.join(SOUNDS_DIR_NAME))
    }
}

/// Per-user configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("earcons"))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert!(settings.enabled);
        assert_eq!(settings.worker_threads, 5);
        assert!(settings.output_device.is_none());
        assert_eq!(settings.log_level, LogLevel::Info);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(&dir.path().join(SETTINGS_FILE_NAME)).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, "{ enabled: ").unwrap();
        let err = Settings::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Malformed settings file"));
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, r#"{"enabled": false, "logLevel": "debug"}"#).unwrap();
        let settings = Settings::load(&path).unwrap();
        assert!(!settings.enabled);
        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.worker_threads, 5);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, r#"{"workerThreads": 0}"#).unwrap();
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);
        let settings = Settings {
            enabled: false,
            worker_threads: 3,
            output_device: Some("Speakers".into()),
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_paths_default_into_config_dir() {
        let settings = Settings::default();
        let dir = Path::new("/cfg");
        assert_eq!(settings.rules_path(dir), dir.join("earconRules.json"));
        assert_eq!(settings.sounds_path(dir), dir.join("sounds"));

        let settings = Settings {
            rules_file: Some(PathBuf::from("/elsewhere/r.json")),
            ..Settings::default()
        };
        assert_eq!(settings.rules_path(dir), PathBuf::from("/elsewhere/r.json"));
    }
}
