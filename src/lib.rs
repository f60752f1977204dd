//! Linux Soundboard - play sound effects through your microphone
//!
//! The library builds a virtual microphone on the PipeWire/PulseAudio server
//! that mixes the real microphone with injected sound effects, and restores
//! the original setup on cleanup. [`HijackService`] is the entry point.

pub mod audio;
pub mod error;
pub mod library;
pub mod models;
pub mod service;
pub mod settings;
pub mod signals;

pub use error::{
    AssetDecodeError, AudioServerError, DeviceQueryError, PlaybackError, SetupError, SinkError,
};
pub use models::{AudioBuffer, OriginalAudioState, SoundEffect, TopologyState};
pub use service::HijackService;
pub use settings::{Settings, SharedSettings};
