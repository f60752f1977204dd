//! The soundboard façade
//!
//! [`HijackService`] is the single object a front-end holds. It owns the
//! virtual device graph and the playback engine, and is safe to share between
//! the UI thread, hotkey threads and exit handlers.

use crate::audio::cache::EffectCache;
use crate::audio::devices::{DeviceResolver, InputDevices};
use crate::audio::playback::PlaybackEngine;
use crate::audio::server::{AudioServer, Pactl};
use crate::audio::sink::{ExternalSinkLauncher, SinkLauncher};
use crate::audio::topology::{TopologyConfig, TopologyManager};
use crate::error::{DeviceQueryError, PlaybackError, SetupError};
use crate::models::{OriginalAudioState, SoundEffect, TopologyState};
use crate::settings::SharedSettings;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct HijackService {
    devices: DeviceResolver,
    topology: Mutex<TopologyManager>,
    playback: PlaybackEngine,
    settings: SharedSettings,
    injection_monitor: String,
}

impl HijackService {
    /// Service driving the system audio server through `pactl`
    pub fn new(settings: SharedSettings) -> Self {
        Self::with_backends(
            Arc::new(Pactl::new()),
            Arc::new(ExternalSinkLauncher::new()),
            TopologyConfig::default(),
            settings,
        )
    }

    pub fn with_backends(
        server: Arc<dyn AudioServer>,
        launcher: Arc<dyn SinkLauncher>,
        config: TopologyConfig,
        settings: SharedSettings,
    ) -> Self {
        let playback = PlaybackEngine::new(
            launcher,
            Arc::new(EffectCache::new()),
            settings.clone(),
            config.injection_sink.clone(),
        );
        Self {
            devices: DeviceResolver::new(server.clone(), config.virtual_source.clone()),
            injection_monitor: format!("{}.monitor", config.injection_sink),
            topology: Mutex::new(TopologyManager::new(server, config)),
            playback,
            settings,
        }
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn state(&self) -> TopologyState {
        self.topology().state()
    }

    pub fn is_active(&self) -> bool {
        self.topology().is_active()
    }

    /// Build the virtual microphone around the input device with the given
    /// description, or around the current default input.
    ///
    /// Calling this again rebuilds the graph, e.g. after the user picked
    /// another microphone. An unknown description falls back to the default
    /// input with a warning.
    pub fn setup(&self, device: Option<&str>) -> Result<OriginalAudioState, SetupError> {
        let mic = device
            .filter(|d| !d.trim().is_empty())
            .and_then(|description| self.resolve_input(description));

        let original = {
            let mut topology = self.topology();
            // The injection sink is about to be replaced. Stopping under the
            // lock keeps a concurrent play() from starting into the old graph.
            self.playback.stop();
            topology.setup(mic.as_deref())?
        };

        match self.devices.find_source(|s| s.name == self.injection_monitor) {
            Ok(Some(_)) => debug!("Injection monitor {} is live", self.injection_monitor),
            Ok(None) => warn!(
                "{} did not appear; sound effects may not reach the microphone",
                self.injection_monitor
            ),
            Err(e) => debug!("Could not verify injection monitor: {}", e),
        }

        Ok(original)
    }

    /// Rebuild the graph around another input device
    pub fn select_input_device(&self, description: &str) -> Result<OriginalAudioState, SetupError> {
        info!("Switching microphone to {}", description);
        self.setup(Some(description))
    }

    /// Play an effect into the virtual microphone, replacing any current one
    pub fn play(&self, effect: &SoundEffect) -> Result<(), PlaybackError> {
        // Held so cleanup() cannot tear the graph down between check and launch
        let mut topology = self.topology();
        if !topology.is_active() {
            return Err(PlaybackError::NotReady);
        }
        topology.follow_default_sink();
        self.playback.play(effect)
    }

    pub fn stop(&self) {
        self.playback.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    pub fn current_effect(&self) -> Option<String> {
        self.playback.current_effect()
    }

    /// Stop playback, remove the graph and restore the original default input
    pub fn cleanup(&self) {
        let mut topology = self.topology();
        self.playback.stop();

        if topology.state() == TopologyState::Uninitialized {
            debug!("Nothing to clean up");
            return;
        }
        info!("Cleaning up virtual devices");
        topology.teardown();
    }

    pub fn list_input_devices(&self) -> InputDevices {
        self.devices.list_input_devices()
    }

    /// Re-enumerate input devices, e.g. after hotplug
    pub fn refresh_devices(&self) -> Result<InputDevices, DeviceQueryError> {
        self.devices.refresh()
    }

    fn resolve_input(&self, description: &str) -> Option<String> {
        match self.devices.resolve(description) {
            Ok(name) => Some(name),
            Err(DeviceQueryError::NotFound(_)) => {
                warn!("Input device '{}' not found, using the default input", description);
                None
            }
            Err(e) => {
                warn!("{}; using the default input", e);
                None
            }
        }
    }

    fn topology(&self) -> MutexGuard<'_, TopologyManager> {
        self.topology.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for HijackService {
    fn drop(&mut self) {
        if self.state() != TopologyState::Uninitialized {
            self.cleanup();
        }
    }
}
