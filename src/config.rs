//! Player settings (JSON, every field optional).

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::cache_man::AutoBufferPolicy;
use crate::core::playback::PlaybackMode;
use crate::error::Result;

/// Defaults applied to new players
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    // Playback
    pub playback_rate: f64,
    pub playback_mode: PlaybackMode,

    // Buffer (0 = auto, 1 = one frame, usize::MAX = everything)
    pub max_buffer_size: usize,
    pub auto_buffer_total_fraction: f64,     // Share of total memory (default 0.2)
    pub auto_buffer_available_fraction: f64, // Share of available memory (default 0.6)

    // Timing
    pub default_frame_duration_ms: u64, // Used when a frame declares no usable delay
    pub min_frame_duration_ms: u64,     // Shorter coded delays fall back to the default

    // Workers (0 = auto)
    pub worker_threads: usize,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        let policy = AutoBufferPolicy::default();
        Self {
            playback_rate: 1.0,
            playback_mode: PlaybackMode::Normal,
            max_buffer_size: 0,
            auto_buffer_total_fraction: policy.total_fraction,
            auto_buffer_available_fraction: policy.available_fraction,
            default_frame_duration_ms: 100,
            min_frame_duration_ms: 20,
            worker_threads: 0,
        }
    }
}

impl PlayerSettings {
    /// Load from JSON file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&text)?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn auto_buffer_policy(&self) -> AutoBufferPolicy {
        AutoBufferPolicy {
            total_fraction: self.auto_buffer_total_fraction,
            available_fraction: self.auto_buffer_available_fraction,
        }
    }

    pub fn default_frame_duration(&self) -> Duration {
        Duration::from_millis(self.default_frame_duration_ms.max(1))
    }

    pub fn min_frame_duration(&self) -> Duration {
        Duration::from_millis(self.min_frame_duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let settings = PlayerSettings::load(&temp.path().join("absent.json")).unwrap();
        assert_eq!(settings, PlayerSettings::default());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("animplay.json");
        std::fs::write(&path, r#"{ "playback_rate": 2.0, "playback_mode": "Bounce" }"#).unwrap();

        let settings = PlayerSettings::load(&path).unwrap();
        assert_eq!(settings.playback_rate, 2.0);
        assert_eq!(settings.playback_mode, PlaybackMode::Bounce);
        assert_eq!(settings.max_buffer_size, 0);
        assert_eq!(settings.default_frame_duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_save_then_load() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("animplay.json");
        let settings = PlayerSettings {
            max_buffer_size: 1,
            worker_threads: 3,
            ..Default::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(PlayerSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("animplay.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            PlayerSettings::load(&path),
            Err(crate::error::PlayerError::Config(_))
        ));
    }
}
