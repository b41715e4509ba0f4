//! Persisted user settings
//!
//! Stored as JSON at `<data dir>/MP3 Speed/settings.json`
//! (`~/Library/Application Support/MP3 Speed/` on macOS).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::conversion::BatchOptions;

fn default_speed() -> f64 {
    1.5
}

fn default_codec() -> String {
    "libmp3lame".to_string()
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Playback speed multiplier
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Output codec name passed to ffmpeg
    #[serde(default = "default_codec")]
    pub codec: String,
    /// Fixed output bitrate; each file keeps its own when unset
    #[serde(default)]
    pub bitrate_kbps: Option<u32>,
    /// Where converted files go; the current directory when unset
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Bundle all outputs into one zip instead of separate files
    #[serde(default)]
    pub archive: bool,
    /// Explicit ffmpeg binary
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            codec: default_codec(),
            bitrate_kbps: None,
            output_dir: None,
            archive: false,
            ffmpeg_path: None,
        }
    }
}

impl Settings {
    const SETTINGS_FILE: &'static str = "settings.json";

    /// Get the app data directory, creating it if needed
    fn get_app_data_dir() -> Result<PathBuf, String> {
        let data_dir =
            dirs::data_dir().ok_or_else(|| "Could not determine data directory".to_string())?;

        let app_dir = data_dir.join("MP3 Speed");
        if !app_dir.exists() {
            std::fs::create_dir_all(&app_dir)
                .map_err(|e| format!("Failed to create app data directory: {}", e))?;
        }

        Ok(app_dir)
    }

    /// Load settings from disk, or return defaults if missing or invalid
    pub fn load() -> Self {
        let loaded = Self::get_app_data_dir()
            .and_then(|dir| Self::try_load_from(&dir.join(Self::SETTINGS_FILE)));
        match loaded {
            Ok(settings) => {
                log::debug!("Loaded settings from disk");
                settings
            }
            Err(e) => {
                log::debug!("Using default settings: {}", e);
                Self::default()
            }
        }
    }

    fn try_load_from(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Err("Settings file not found".to_string());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read settings: {}", e))?;

        let settings: Self = serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to the app data directory
    pub fn save(&self) -> Result<PathBuf, String> {
        let path = Self::get_app_data_dir()?.join(Self::SETTINGS_FILE);
        self.save_to(&path)?;
        Ok(path)
    }

    fn save_to(&self, path: &Path) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        std::fs::write(path, json).map_err(|e| format!("Failed to write settings: {}", e))?;

        log::debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Reject values no conversion could run with
    pub fn validate(&self) -> Result<(), String> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(format!("Speed must be a positive number, got {}", self.speed));
        }
        if self.codec.trim().is_empty() {
            return Err("Codec must not be empty".to_string());
        }
        if self.bitrate_kbps == Some(0) {
            return Err("Bitrate must be above zero".to_string());
        }
        Ok(())
    }

    /// Directory converted files are written to
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            speed: self.speed,
            codec: self.codec.clone(),
            bitrate_override: self.bitrate_kbps,
        }
    }
}
