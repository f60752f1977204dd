use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A playable sound on the board
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundEffect {
    path: PathBuf,
    pub name: String,
    /// Per-effect multiplier, never negative
    pub volume: f32,
}

impl SoundEffect {
    /// Create an effect named after its file at full volume
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = Self::name_from_path(&path);
        Self {
            path,
            name,
            volume: 1.0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.set_volume(volume);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_finite() { volume.max(0.0) } else { 0.0 };
    }

    /// File name up to the first dot, e.g. `airhorn.final.mp3` -> `airhorn`
    fn name_from_path(path: &Path) -> String {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match file_name.split('.').next() {
            Some(stem) if !stem.is_empty() => stem.to_string(),
            _ => file_name,
        }
    }
}

/// Decoded, normalized mono audio ready to stream
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Default devices captured before the virtual microphone replaced them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalAudioState {
    pub default_source: String,
    pub default_sink: String,
}

/// Identifier the audio server returned for a loaded module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of the virtual device graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopologyState {
    #[default]
    Uninitialized,
    Building,
    Active,
    TearingDown,
    Failed,
}

/// An audio source as reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceInfo {
    /// Driver-level name, e.g. `alsa_input.usb-Blue_Yeti-00.analog-stereo`
    pub name: String,
    pub description: String,
    pub device_class: Option<String>,
    pub media_class: Option<String>,
}

impl SourceInfo {
    pub fn is_monitor(&self) -> bool {
        self.name.contains(".monitor")
    }

    /// Backed by a sound card or exposed as a plain audio input
    pub fn is_capture_device(&self) -> bool {
        self.device_class.as_deref() == Some("sound")
            || self.media_class.as_deref() == Some("Audio/Source")
    }
}

/// A module currently loaded in the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub name: String,
    pub argument: String,
}
