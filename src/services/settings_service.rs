use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{LauncherError, Result};
use crate::models::LauncherSettings;

const CONFIG_DIR_NAME: &str = ".devserver-launcher";
const SETTINGS_FILE: &str = "settings.json";
const CATALOG_FILE: &str = "projects.json";

/// Reads and writes `settings.json` in the launcher's config directory.
#[derive(Debug, Clone)]
pub struct SettingsService {
    config_dir: PathBuf,
}

impl SettingsService {
    /// Service rooted at `~/.devserver-launcher`.
    pub fn from_home() -> Result<Self> {
        let home = dirs_next::home_dir().ok_or(LauncherError::HomeDirUnavailable)?;
        Ok(Self::new(home.join(CONFIG_DIR_NAME)))
    }

    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn settings_path(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE)
    }

    /// Where the project catalog lives for `settings`.
    pub fn catalog_path(&self, settings: &LauncherSettings) -> PathBuf {
        settings
            .catalog_path
            .clone()
            .unwrap_or_else(|| self.config_dir.join(CATALOG_FILE))
    }

    /// Missing file means defaults; missing fields take their defaults.
    pub fn load(&self) -> Result<LauncherSettings> {
        let path = self.settings_path();
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(LauncherSettings::default());
        }
        let content = fs::read_to_string(&path)?;
        let settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    pub fn save(&self, settings: &LauncherSettings) -> Result<()> {
        fs::create_dir_all(&self.config_dir)?;
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(self.settings_path(), content)?;
        info!(path = %self.settings_path().display(), "settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let service = SettingsService::new(dir.path().join("cfg"));
        assert_eq!(service.load().unwrap(), LauncherSettings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let service = SettingsService::new(dir.path());
        fs::write(service.settings_path(), r#"{"port_range_start": 4000}"#).unwrap();

        let settings = service.load().unwrap();
        assert_eq!(settings.port_range_start, 4000);
        assert_eq!(settings.port_range_end, 3300);
        assert_eq!(service.catalog_path(&settings), dir.path().join("projects.json"));
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let service = SettingsService::new(dir.path().join("nested"));
        let settings = LauncherSettings {
            check_system_ports: true,
            output_buffer_lines: 200,
            ..LauncherSettings::default()
        };
        service.save(&settings).unwrap();
        assert_eq!(service.load().unwrap(), settings);
    }
}
