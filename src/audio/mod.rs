//! Audio server control and effect playback
//!
//! This module provides:
//! - The virtual device graph on PipeWire/PulseAudio, driven through `pactl`
//! - Input device enumeration
//! - Decoding and caching of sound effects
//! - Streaming to `pw-play`/`paplay` with live volume

pub mod cache;
pub mod decode;
pub mod devices;
#[cfg(test)]
pub mod mock;
pub mod playback;
pub mod server;
pub mod sink;
pub mod topology;

pub use cache::EffectCache;
pub use devices::{DeviceResolver, InputDevices};
pub use playback::PlaybackEngine;
pub use server::{AudioServer, Pactl};
pub use sink::{ExternalSinkLauncher, SinkCommand, SinkLauncher, SinkProcess, SinkTool, StreamSpec};
pub use topology::{TopologyConfig, TopologyManager};
