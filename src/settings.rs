//! Persisted user settings
//!
//! Settings are stored as JSON in `~/.config/linux-soundboard/settings.json`.
//! The core only reads them; the front-end owns writes.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

const APP_DIR: &str = "linux-soundboard";
const SETTINGS_FILE: &str = "settings.json";

/// Volume ceiling without boost
pub const NORMAL_MAX_VOLUME: f32 = 1.0;
/// Volume ceiling with boost enabled
pub const BOOST_MAX_VOLUME: f32 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Description of the microphone mixed into the virtual mic, empty for system default
    #[serde(alias = "output_device", alias = "selected_output_device")]
    pub selected_input_device: String,
    pub global_volume: f32,
    pub volume_boost: bool,
    /// Prepend a short noise floor so noise suppression does not gate the sound
    #[serde(alias = "wakeup_noise_enabled")]
    pub wakeup_noise: bool,
    pub sound_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            selected_input_device: String::new(),
            global_volume: 1.0,
            volume_boost: false,
            wakeup_noise: false,
            sound_dir: None,
        }
    }
}

impl Settings {
    pub fn max_volume(&self) -> f32 {
        if self.volume_boost {
            BOOST_MAX_VOLUME
        } else {
            NORMAL_MAX_VOLUME
        }
    }

    pub fn clamp_volume(&self, volume: f32) -> f32 {
        if volume.is_nan() {
            return 0.0;
        }
        volume.clamp(0.0, self.max_volume())
    }

    /// Selected input device, `None` when the system default should be used
    pub fn input_device(&self) -> Option<&str> {
        let trimmed = self.selected_input_device.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    /// Directory to scan for sounds
    pub fn sound_dir(&self) -> PathBuf {
        self.sound_dir.clone().unwrap_or_else(default_sound_dir)
    }

    /// Default settings file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join(SETTINGS_FILE)
    }

    /// Load settings, falling back to defaults if the file is missing or unreadable
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Self::default();
        }

        let parsed = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read settings: {}", e))
            .and_then(|contents| {
                serde_json::from_str::<Settings>(&contents)
                    .map_err(|e| format!("Failed to parse settings: {}", e))
            });

        match parsed {
            Ok(mut settings) => {
                settings.global_volume = settings.clamp_volume(settings.global_volume);
                settings
            }
            Err(e) => {
                warn!("{} ({}), using defaults", e, path.display());
                Self::default()
            }
        }
    }

    /// Save settings, creating the parent directory if needed
    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {}", e))?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        fs::write(path, contents).map_err(|e| format!("Failed to write settings: {}", e))
    }
}

/// Default sound library location
pub fn default_sound_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Settings shared between the front-end and playback workers - thread-safe
#[derive(Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Copy of the current settings
    pub fn snapshot(&self) -> Settings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read on every streamed chunk
    pub fn global_volume(&self) -> f32 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .global_volume
    }

    pub fn wakeup_noise(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .wakeup_noise
    }

    /// Set the global volume, clamped to the current ceiling. Returns the stored value.
    pub fn set_global_volume(&self, volume: f32) -> f32 {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.global_volume = inner.clamp_volume(volume);
        inner.global_volume
    }

    pub fn set_volume_boost(&self, boost: bool) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.volume_boost = boost;
        inner.global_volume = inner.clamp_volume(inner.global_volume);
    }

    pub fn set_wakeup_noise(&self, enabled: bool) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .wakeup_noise = enabled;
    }

    pub fn set_selected_input_device(&self, description: impl Into<String>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .selected_input_device = description.into();
    }
}
