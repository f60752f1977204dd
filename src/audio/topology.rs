//! Virtual device graph on the audio server
//!
//! ```text
//! Real Mic ──────────────────────────┐
//!                                    ├──> mic_mixer ──monitor──> hijacked_microphone (default input)
//! soundboard_injection ──monitor──┬──┘
//!                                 └──> default output (local monitoring)
//! ```
//!
//! Every module we load is tracked so teardown can unload exactly those, in
//! reverse order, since later modules refer to earlier ones by name.

use crate::audio::server::AudioServer;
use crate::error::{AudioServerError, SetupError};
use crate::models::{ModuleId, ModuleInfo, OriginalAudioState, TopologyState};
use log::{debug, error, info, warn};
use std::sync::Arc;

const NULL_SINK: &str = "module-null-sink";
const REMAP_SOURCE: &str = "module-remap-source";
const LOOPBACK: &str = "module-loopback";

/// Module types we create, in the order a blind sweep should unload them
const MANAGED_MODULE_TYPES: [&str; 3] = [LOOPBACK, REMAP_SOURCE, NULL_SINK];

/// Names and tuning of the nodes we create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyConfig {
    /// Null sink that sound effects are played into
    pub injection_sink: String,
    pub injection_description: String,
    /// Null sink combining the real mic and injected audio
    pub mixer_sink: String,
    pub mixer_description: String,
    /// Source other applications record from
    pub virtual_source: String,
    pub virtual_description: String,
    pub latency_msec: u32,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            injection_sink: "soundboard_injection".to_string(),
            injection_description: "Soundboard_Injection".to_string(),
            mixer_sink: "mic_mixer".to_string(),
            mixer_description: "Microphone_Mixer".to_string(),
            virtual_source: "hijacked_microphone".to_string(),
            virtual_description: "Soundboard_Microphone".to_string(),
            latency_msec: 20,
        }
    }
}

impl TopologyConfig {
    fn injection_monitor(&self) -> String {
        format!("{}.monitor", self.injection_sink)
    }

    fn mixer_monitor(&self) -> String {
        format!("{}.monitor", self.mixer_sink)
    }

    /// Node names that identify our modules on the server
    fn node_names(&self) -> [String; 5] {
        [
            self.injection_sink.clone(),
            self.injection_monitor(),
            self.mixer_sink.clone(),
            self.mixer_monitor(),
            self.virtual_source.clone(),
        ]
    }

    /// True if a module argument string references one of our nodes
    fn references_our_nodes(&self, argument: &str) -> bool {
        let names = self.node_names();
        argument.split_whitespace().any(|kv| {
            kv.split_once('=')
                .map(|(_, value)| value.trim_matches(|c| c == '"' || c == '\''))
                .is_some_and(|value| names.iter().any(|n| n == value))
        })
    }

    fn null_sink_args(name: &str, description: &str) -> Vec<String> {
        vec![
            format!("sink_name={}", name),
            format!("sink_properties=device.description={}", description),
        ]
    }

    fn loopback_args(&self, source: &str, sink: &str) -> Vec<String> {
        vec![
            format!("source={}", source),
            format!("sink={}", sink),
            format!("latency_msec={}", self.latency_msec),
            "source_dont_move=true".to_string(),
            "sink_dont_move=true".to_string(),
        ]
    }
}

/// Loopback from the injection monitor to the speakers
#[derive(Debug, Clone)]
struct SpeakerRoute {
    id: ModuleId,
    sink: String,
}

pub struct TopologyManager {
    server: Arc<dyn AudioServer>,
    config: TopologyConfig,
    handles: Vec<ModuleId>,
    original: Option<OriginalAudioState>,
    speaker_route: Option<SpeakerRoute>,
    state: TopologyState,
}

impl TopologyManager {
    pub fn new(server: Arc<dyn AudioServer>, config: TopologyConfig) -> Self {
        Self {
            server,
            config,
            handles: Vec::new(),
            original: None,
            speaker_route: None,
            state: TopologyState::Uninitialized,
        }
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    pub fn state(&self) -> TopologyState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TopologyState::Active
    }

    /// Modules loaded by this manager, in creation order
    pub fn handles(&self) -> &[ModuleId] {
        &self.handles
    }

    pub fn original(&self) -> Option<&OriginalAudioState> {
        self.original.as_ref()
    }

    /// Build the graph, routing `mic_source` (or the current default input) into it.
    ///
    /// A previous graph is torn down first. Leftovers from a process that died
    /// without cleaning up are swept before anything is captured.
    pub fn setup(&mut self, mic_source: Option<&str>) -> Result<OriginalAudioState, SetupError> {
        match self.state {
            TopologyState::Uninitialized => {
                if self.stale_nodes_present() {
                    warn!("Found virtual devices from a previous run, removing them");
                    self.sweep();
                }
            }
            _ => self.teardown(),
        }

        // Doubles as the liveness probe
        let original = self
            .capture_original()
            .map_err(SetupError::AudioServerUnavailable)?;
        info!(
            "Original input: {}, output: {}",
            original.default_source, original.default_sink
        );
        self.original = Some(original.clone());
        self.state = TopologyState::Building;

        if let Err(e) = self.create_nodes() {
            error!("{}", e);
            self.restore_default_source();
            self.unload_tracked();
            self.state = TopologyState::Failed;
            return Err(e);
        }

        let config = self.config.clone();
        let mic = mic_source.unwrap_or(&original.default_source);
        info!("Routing {} into {}", mic, config.mixer_sink);

        self.load_optional(
            "microphone route",
            LOOPBACK,
            config.loopback_args(mic, &config.mixer_sink),
        );
        self.load_optional(
            "injection route to mixer",
            LOOPBACK,
            config.loopback_args(&config.injection_monitor(), &config.mixer_sink),
        );
        self.load_speaker_route(&original.default_sink);

        if let Err(e) = self.server.set_default_source(&config.virtual_source) {
            warn!("Could not make {} the default input: {}", config.virtual_source, e);
        }

        self.force_full_volume();

        self.state = TopologyState::Active;
        info!("Virtual microphone active ({} modules)", self.handles.len());
        Ok(original)
    }

    /// Restore the original default input, then unload everything we created.
    ///
    /// With nothing tracked (e.g. after a restart) this falls back to
    /// [`sweep`](Self::sweep), which is best-effort.
    pub fn teardown(&mut self) {
        self.state = TopologyState::TearingDown;

        // Must happen while our virtual source still exists
        self.restore_default_source();
        self.original = None;

        if self.handles.is_empty() {
            self.sweep();
        } else {
            self.unload_tracked();
        }

        self.state = TopologyState::Uninitialized;
    }

    /// Unload modules we did not track but which reference our node names.
    ///
    /// If the server cannot list modules, every module of the types we use is
    /// unloaded, which also removes loopbacks and null sinks owned by other
    /// applications or another running instance.
    pub fn sweep(&self) {
        match self.server.list_modules() {
            Ok(modules) => {
                let ours: Vec<&ModuleInfo> = modules
                    .iter()
                    .rev()
                    .filter(|m| MANAGED_MODULE_TYPES.contains(&m.name.as_str()))
                    .filter(|m| self.config.references_our_nodes(&m.argument))
                    .collect();
                if ours.is_empty() {
                    debug!("Sweep found no leftover modules");
                }
                for module in ours {
                    info!("Unloading leftover {} ({})", module.name, module.id);
                    if let Err(e) = self.server.unload_module(&module.id) {
                        warn!("Failed to unload module {}: {}", module.id, e);
                    }
                }
            }
            Err(e) => {
                warn!(
                    "Cannot list modules ({}); unloading by type. Unrelated modules may be removed and ours may linger",
                    e
                );
                for module in MANAGED_MODULE_TYPES {
                    if let Err(e) = self.server.unload_modules_by_type(module) {
                        debug!("Unload of {} failed: {}", module, e);
                    }
                }
            }
        }
    }

    fn capture_original(&self) -> Result<OriginalAudioState, AudioServerError> {
        Ok(OriginalAudioState {
            default_source: self.server.default_source()?,
            default_sink: self.server.default_sink()?,
        })
    }

    /// Injection sink, mixer sink and virtual source; any failure is fatal
    fn create_nodes(&mut self) -> Result<(), SetupError> {
        let config = self.config.clone();

        self.load_required(
            "injection sink",
            NULL_SINK,
            TopologyConfig::null_sink_args(&config.injection_sink, &config.injection_description),
        )?;
        self.load_required(
            "mixer sink",
            NULL_SINK,
            TopologyConfig::null_sink_args(&config.mixer_sink, &config.mixer_description),
        )?;
        self.load_required(
            "virtual microphone",
            REMAP_SOURCE,
            vec![
                format!("source_name={}", config.virtual_source),
                format!("master={}", config.mixer_monitor()),
                format!(
                    "source_properties=device.description={}",
                    config.virtual_description
                ),
            ],
        )
    }

    fn load_required(
        &mut self,
        step: &'static str,
        module: &str,
        args: Vec<String>,
    ) -> Result<(), SetupError> {
        let id = self
            .server
            .load_module(module, &args)
            .map_err(|source| SetupError::TopologyBuild { step, source })?;
        debug!("Created {} (module {})", step, id);
        self.handles.push(id);
        Ok(())
    }

    fn load_optional(&mut self, step: &str, module: &str, args: Vec<String>) -> Option<ModuleId> {
        match self.server.load_module(module, &args) {
            Ok(id) => {
                debug!("Created {} (module {})", step, id);
                self.handles.push(id.clone());
                Some(id)
            }
            Err(e) => {
                warn!("Skipping {}: {}", step, e);
                None
            }
        }
    }

    fn load_speaker_route(&mut self, sink: &str) {
        let args = self
            .config
            .loopback_args(&self.config.injection_monitor(), sink);
        self.speaker_route = self
            .load_optional("injection route to speakers", LOOPBACK, args)
            .map(|id| SpeakerRoute {
                id,
                sink: sink.to_string(),
            });
    }

    /// Point local monitoring at the current default output.
    ///
    /// The route is pinned to its sink, so when the user switches outputs (or
    /// the old one disappears and the server unloads the route) it is
    /// recreated against the new default. No-op unless active.
    pub fn follow_default_sink(&mut self) {
        if !self.is_active() {
            return;
        }
        let sink = match self.server.default_sink() {
            Ok(sink) => sink,
            Err(e) => {
                debug!("Could not read default output: {}", e);
                return;
            }
        };
        if self
            .speaker_route
            .as_ref()
            .is_some_and(|route| route.sink == sink)
        {
            return;
        }

        info!("Default output is now {}, moving local monitoring", sink);
        if let Some(old) = self.speaker_route.take() {
            self.handles.retain(|id| id != &old.id);
            // The server drops a pinned loopback when its sink goes away
            if let Err(e) = self.server.unload_module(&old.id) {
                debug!("Old speaker route {} already gone: {}", old.id, e);
            }
        }
        self.load_speaker_route(&sink);
    }

    /// Servers may create nodes quiet or muted, which makes injected sound inaudible
    fn force_full_volume(&self) {
        let config = &self.config;
        for sink in [&config.injection_sink, &config.mixer_sink] {
            if let Err(e) = self.server.set_sink_volume(sink, 100) {
                warn!("Could not set volume of {}: {}", sink, e);
            }
            if let Err(e) = self.server.set_sink_mute(sink, false) {
                warn!("Could not unmute {}: {}", sink, e);
            }
        }
        if let Err(e) = self.server.set_source_volume(&config.virtual_source, 100) {
            warn!("Could not set volume of {}: {}", config.virtual_source, e);
        }
        if let Err(e) = self.server.set_source_mute(&config.virtual_source, false) {
            warn!("Could not unmute {}: {}", config.virtual_source, e);
        }
    }

    fn restore_default_source(&self) {
        let Some(original) = &self.original else {
            return;
        };
        info!("Restoring default input {}", original.default_source);
        if let Err(e) = self.server.set_default_source(&original.default_source) {
            warn!("Could not restore default input: {}", e);
        }
    }

    fn unload_tracked(&mut self) {
        self.speaker_route = None;
        while let Some(id) = self.handles.pop() {
            if let Err(e) = self.server.unload_module(&id) {
                warn!("Failed to unload module {}: {}", id, e);
            }
        }
    }

    fn stale_nodes_present(&self) -> bool {
        let names = self.config.node_names();
        match self.server.list_sources() {
            Ok(sources) => sources.iter().any(|s| names.contains(&s.name)),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockAudioServer;
    use crate::models::SourceInfo;

    fn manager() -> (Arc<MockAudioServer>, TopologyManager) {
        let server = Arc::new(MockAudioServer::new());
        let manager = TopologyManager::new(server.clone(), TopologyConfig::default());
        (server, manager)
    }

    #[test]
    fn test_setup_builds_full_graph() {
        let (server, mut manager) = manager();
        let original = manager.setup(None).unwrap();

        assert_eq!(original.default_source, "alsa_input.builtin");
        assert_eq!(original.default_sink, "alsa_output.builtin");
        assert_eq!(manager.state(), TopologyState::Active);
        assert_eq!(manager.handles().len(), 6);
        assert_eq!(server.modules().len(), 6);
        assert_eq!(server.default_source_now(), "hijacked_microphone");

        let loopbacks: Vec<_> = server
            .modules()
            .into_iter()
            .filter(|m| m.name == LOOPBACK)
            .map(|m| m.argument)
            .collect();
        assert!(loopbacks[0].starts_with("source=alsa_input.builtin sink=mic_mixer"));
        assert!(loopbacks[1].starts_with("source=soundboard_injection.monitor sink=mic_mixer"));
        assert!(loopbacks[2]
            .starts_with("source=soundboard_injection.monitor sink=alsa_output.builtin"));
    }

    #[test]
    fn test_teardown_restores_before_unloading_in_reverse() {
        let (server, mut manager) = manager();
        manager.setup(None).unwrap();
        let mut created = manager.handles().to_vec();

        manager.teardown();

        created.reverse();
        assert_eq!(server.unloaded(), created);
        assert!(server.modules().is_empty());
        assert!(manager.handles().is_empty());
        assert_eq!(server.default_source_now(), "alsa_input.builtin");
        assert!(!server.default_was_dangling());
        assert_eq!(manager.state(), TopologyState::Uninitialized);
    }

    #[test]
    fn test_unreachable_server_is_fatal() {
        let server = Arc::new(MockAudioServer::unreachable());
        let mut manager = TopologyManager::new(server.clone(), TopologyConfig::default());

        let err = manager.setup(None).unwrap_err();
        assert!(matches!(err, SetupError::AudioServerUnavailable(_)));
        assert_eq!(manager.state(), TopologyState::Uninitialized);
        assert!(manager.handles().is_empty());
    }

    #[test]
    fn test_essential_failure_removes_partial_graph() {
        let (server, mut manager) = manager();
        server.fail(REMAP_SOURCE);

        let err = manager.setup(None).unwrap_err();
        assert!(matches!(
            err,
            SetupError::TopologyBuild {
                step: "virtual microphone",
                ..
            }
        ));
        assert_eq!(manager.state(), TopologyState::Failed);
        assert!(server.modules().is_empty());
        assert_eq!(server.default_source_now(), "alsa_input.builtin");
    }

    #[test]
    fn test_optional_failures_are_skipped() {
        let (server, mut manager) = manager();
        server.fail(LOOPBACK);
        server.fail("set-sink-volume");
        server.fail("set-source-mute");

        manager.setup(None).unwrap();
        assert_eq!(manager.state(), TopologyState::Active);
        assert_eq!(manager.handles().len(), 3);
        assert_eq!(server.default_source_now(), "hijacked_microphone");
    }

    #[test]
    fn test_selected_mic_is_routed() {
        let (server, mut manager) = manager();
        server.add_source(SourceInfo {
            name: "usb_mic".to_string(),
            description: "USB Mic".to_string(),
            device_class: Some("sound".to_string()),
            media_class: None,
        });

        let original = manager.setup(Some("usb_mic")).unwrap();
        // the default input is what gets restored, not the selected mic
        assert_eq!(original.default_source, "alsa_input.builtin");
        assert!(server
            .modules()
            .iter()
            .any(|m| m.name == LOOPBACK && m.argument.starts_with("source=usb_mic sink=mic_mixer")));
    }

    #[test]
    fn test_repeated_setup_does_not_duplicate_nodes() {
        let (server, mut manager) = manager();
        let first = manager.setup(None).unwrap();
        let second = manager.setup(None).unwrap();

        assert_eq!(first, second);
        assert_eq!(server.modules().len(), 6);
        assert_eq!(manager.handles().len(), 6);

        manager.teardown();
        assert!(server.modules().is_empty());
        assert_eq!(server.default_source_now(), "alsa_input.builtin");
    }

    #[test]
    fn test_second_teardown_leaves_foreign_modules() {
        let (server, mut manager) = manager();
        let foreign = server.add_foreign_module(LOOPBACK, "source=alsa_input.builtin sink=obs_sink");
        manager.setup(None).unwrap();

        manager.teardown();
        manager.teardown();

        let remaining = server.modules();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, foreign);
        assert_eq!(server.default_source_now(), "alsa_input.builtin");
    }

    #[test]
    fn test_leftovers_from_crashed_run_are_swept() {
        let (server, mut manager) = manager();
        let foreign = server.add_foreign_module(NULL_SINK, "sink_name=obs_sink");
        server.add_foreign_module(NULL_SINK, "sink_name=soundboard_injection");
        server.add_foreign_module(NULL_SINK, "sink_name=mic_mixer");
        server.add_foreign_module(
            REMAP_SOURCE,
            "source_name=hijacked_microphone master=mic_mixer.monitor",
        );
        server.set_default_source_now("hijacked_microphone");

        let original = manager.setup(None).unwrap();

        assert_eq!(original.default_source, "alsa_input.builtin");
        assert_eq!(server.modules().len(), 7);
        assert!(server.modules().iter().any(|m| m.id == foreign));
    }

    #[test]
    fn test_sweep_falls_back_to_unload_by_type() {
        let (server, manager) = manager();
        server.add_foreign_module(LOOPBACK, "source=a sink=b");
        server.add_foreign_module("module-echo-cancel", "");
        server.fail("list-modules");

        manager.sweep();

        let remaining = server.modules();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "module-echo-cancel");
    }

    #[test]
    fn test_references_our_nodes() {
        let config = TopologyConfig::default();
        assert!(config.references_our_nodes("source=soundboard_injection.monitor sink=x"));
        assert!(config.references_our_nodes("sink_name=\"mic_mixer\""));
        assert!(!config.references_our_nodes("sink_name=mic_mixer_other"));
        assert!(!config.references_our_nodes(""));
    }

    fn speaker_routes(server: &MockAudioServer) -> Vec<String> {
        server
            .modules()
            .into_iter()
            .filter(|m| m.name == LOOPBACK && !m.argument.contains("sink=mic_mixer"))
            .map(|m| m.argument)
            .collect()
    }

    #[test]
    fn test_speaker_route_follows_default_output() {
        let (server, mut manager) = manager();
        manager.setup(None).unwrap();

        server.set_default_sink_now("bluez_output.headset");
        manager.follow_default_sink();

        let routes = speaker_routes(&server);
        assert_eq!(routes.len(), 1);
        assert!(routes[0]
            .starts_with("source=soundboard_injection.monitor sink=bluez_output.headset"));
        assert_eq!(manager.handles().len(), 6);

        manager.teardown();
        assert!(server.modules().is_empty());
    }

    #[test]
    fn test_unchanged_output_keeps_route() {
        let (server, mut manager) = manager();
        manager.setup(None).unwrap();
        let before = manager.handles().to_vec();

        manager.follow_default_sink();
        manager.follow_default_sink();

        assert_eq!(manager.handles(), &before[..]);
        let loads = server.commands().iter().filter(|c| *c == LOOPBACK).count();
        assert_eq!(loads, 3);
    }

    #[test]
    fn test_route_removed_by_server_is_replaced() {
        let (server, mut manager) = manager();
        manager.setup(None).unwrap();
        let route = manager.handles()[5].clone();

        // unplugging the headset: the server drops the pinned loopback
        server.unload_module(&route).unwrap();
        server.set_default_sink_now("alsa_output.hdmi");
        manager.follow_default_sink();

        assert_eq!(manager.handles().len(), 6);
        assert!(!manager.handles().contains(&route));
        assert_eq!(server.modules().len(), 6);
        assert_eq!(speaker_routes(&server).len(), 1);

        manager.teardown();
        assert!(server.modules().is_empty());
    }

    #[test]
    fn test_follow_is_noop_when_inactive() {
        let (server, mut manager) = manager();
        manager.follow_default_sink();
        assert!(server.commands().is_empty());
    }
}
