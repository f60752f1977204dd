//! In-memory audio server and sink launcher for tests.
//!
//! `MockAudioServer` models just enough of `pactl` semantics to observe the
//! topology: modules get increasing ids, null sinks expose `<name>.monitor`
//! sources, remap sources add a named source, and unloading a module removes
//! what it created. It also records when the default source was left pointing
//! at a removed node.

use crate::audio::server::AudioServer;
use crate::audio::sink::{SinkHandle, SinkLauncher, SinkProcess, StreamSpec};
use crate::error::{AudioServerError, SinkError};
use crate::models::{ModuleId, ModuleInfo, SourceInfo};
use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct ServerState {
    reachable: bool,
    default_source: String,
    default_sink: String,
    sources: Vec<SourceInfo>,
    modules: Vec<ModuleInfo>,
    next_module: u32,
    failing: HashSet<String>,
    commands: Vec<String>,
    unloaded: Vec<ModuleId>,
    dangling_default: bool,
}

pub struct MockAudioServer {
    state: Mutex<ServerState>,
}

impl MockAudioServer {
    /// A reachable server with one physical mic and one output
    pub fn new() -> Self {
        let server = Self {
            state: Mutex::new(ServerState {
                reachable: true,
                default_source: "alsa_input.builtin".to_string(),
                default_sink: "alsa_output.builtin".to_string(),
                next_module: 100,
                ..Default::default()
            }),
        };
        server.add_source(physical_source("alsa_input.builtin", "Built-in Microphone"));
        server.add_source(SourceInfo {
            name: "alsa_output.builtin.monitor".to_string(),
            description: "Monitor of Built-in Audio".to_string(),
            device_class: Some("monitor".to_string()),
            media_class: None,
        });
        server
    }

    pub fn unreachable() -> Self {
        let server = Self::new();
        server.state.lock().unwrap().reachable = false;
        server
    }

    pub fn add_source(&self, source: SourceInfo) {
        self.state.lock().unwrap().sources.push(source);
    }

    /// Simulate a module loaded by some other client
    pub fn add_foreign_module(&self, name: &str, argument: &str) -> ModuleId {
        let mut state = self.state.lock().unwrap();
        let id = ModuleId::new(state.next_module.to_string());
        state.next_module += 1;
        if let Some(source) = created_source(name, argument) {
            state.sources.push(SourceInfo {
                name: source.clone(),
                description: source,
                device_class: None,
                media_class: Some("Audio/Source/Virtual".to_string()),
            });
        }
        state.modules.push(ModuleInfo {
            id: id.clone(),
            name: name.to_string(),
            argument: argument.to_string(),
        });
        id
    }

    /// Make commands fail. Keys are module types (`module-loopback`) or
    /// operation names (`set-sink-volume`, `list-modules`, ...).
    pub fn fail(&self, key: &str) {
        self.state.lock().unwrap().failing.insert(key.to_string());
    }

    pub fn default_source_now(&self) -> String {
        self.state.lock().unwrap().default_source.clone()
    }

    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.state.lock().unwrap().modules.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Module ids in the order they were unloaded
    pub fn unloaded(&self) -> Vec<ModuleId> {
        self.state.lock().unwrap().unloaded.clone()
    }

    pub fn set_default_source_now(&self, name: &str) {
        self.state.lock().unwrap().default_source = name.to_string();
    }

    /// Change the default output behind the manager's back
    pub fn set_default_sink_now(&self, name: &str) {
        self.state.lock().unwrap().default_sink = name.to_string();
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .sources
            .iter()
            .any(|s| s.name == name)
    }

    /// True if a node serving as default source was ever removed
    pub fn default_was_dangling(&self) -> bool {
        self.state.lock().unwrap().dangling_default
    }

    fn check(&self, op: &str) -> Result<std::sync::MutexGuard<'_, ServerState>, AudioServerError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(op.to_string());
        if !state.reachable || state.failing.contains(op) {
            return Err(AudioServerError::CommandFailed {
                command: op.to_string(),
                stderr: "Connection failure: Connection refused".to_string(),
            });
        }
        Ok(state)
    }

    fn remove_module(state: &mut ServerState, index: usize) {
        let module = state.modules.remove(index);
        state.unloaded.push(module.id.clone());
        if let Some(name) = created_source(&module.name, &module.argument) {
            state.sources.retain(|s| s.name != name);
            // the server falls back to some other source, like PulseAudio does
            if state.default_source == name {
                state.dangling_default = true;
                state.default_source = state
                    .sources
                    .iter()
                    .find(|s| !s.is_monitor())
                    .map(|s| s.name.clone())
                    .unwrap_or_default();
            }
        }
    }
}

fn physical_source(name: &str, description: &str) -> SourceInfo {
    SourceInfo {
        name: name.to_string(),
        description: description.to_string(),
        device_class: Some("sound".to_string()),
        media_class: Some("Audio/Source".to_string()),
    }
}

fn arg_value<'a>(argument: &'a str, key: &str) -> Option<&'a str> {
    argument
        .split_whitespace()
        .find_map(|kv| kv.strip_prefix(key)?.strip_prefix('='))
}

/// The source a module exposes, if any
fn created_source(module: &str, argument: &str) -> Option<String> {
    match module {
        "module-null-sink" => arg_value(argument, "sink_name").map(|n| format!("{}.monitor", n)),
        "module-remap-source" => arg_value(argument, "source_name").map(str::to_string),
        _ => None,
    }
}

impl AudioServer for MockAudioServer {
    fn default_source(&self) -> Result<String, AudioServerError> {
        Ok(self.check("get-default-source")?.default_source.clone())
    }

    fn default_sink(&self) -> Result<String, AudioServerError> {
        Ok(self.check("get-default-sink")?.default_sink.clone())
    }

    fn list_sources(&self) -> Result<Vec<SourceInfo>, AudioServerError> {
        Ok(self.check("list-sources")?.sources.clone())
    }

    fn list_modules(&self) -> Result<Vec<ModuleInfo>, AudioServerError> {
        Ok(self.check("list-modules")?.modules.clone())
    }

    fn load_module(&self, module: &str, args: &[String]) -> Result<ModuleId, AudioServerError> {
        let mut state = self.check(module)?;
        let argument = args.join(" ");
        let id = ModuleId::new(state.next_module.to_string());
        state.next_module += 1;

        if let Some(name) = created_source(module, &argument) {
            state.sources.push(SourceInfo {
                name: name.clone(),
                description: name,
                device_class: None,
                media_class: Some("Audio/Source/Virtual".to_string()),
            });
        }
        state.modules.push(ModuleInfo {
            id: id.clone(),
            name: module.to_string(),
            argument,
        });
        Ok(id)
    }

    fn unload_module(&self, id: &ModuleId) -> Result<(), AudioServerError> {
        let mut state = self.check("unload-module")?;
        let index = state
            .modules
            .iter()
            .position(|m| &m.id == id)
            .ok_or_else(|| AudioServerError::CommandFailed {
                command: format!("unload-module {}", id),
                stderr: "No such entity".to_string(),
            })?;
        Self::remove_module(&mut state, index);
        Ok(())
    }

    fn unload_modules_by_type(&self, module: &str) -> Result<(), AudioServerError> {
        let mut state = self.check("unload-module-by-type")?;
        while let Some(index) = state.modules.iter().position(|m| m.name == module) {
            Self::remove_module(&mut state, index);
        }
        Ok(())
    }

    fn set_default_source(&self, source: &str) -> Result<(), AudioServerError> {
        let mut state = self.check("set-default-source")?;
        if !state.sources.iter().any(|s| s.name == source) {
            return Err(AudioServerError::CommandFailed {
                command: format!("set-default-source {}", source),
                stderr: "No such entity".to_string(),
            });
        }
        state.default_source = source.to_string();
        Ok(())
    }

    fn set_sink_volume(&self, _sink: &str, _percent: u32) -> Result<(), AudioServerError> {
        self.check("set-sink-volume").map(drop)
    }

    fn set_sink_mute(&self, _sink: &str, _muted: bool) -> Result<(), AudioServerError> {
        self.check("set-sink-mute").map(drop)
    }

    fn set_source_volume(&self, _source: &str, _percent: u32) -> Result<(), AudioServerError> {
        self.check("set-source-volume").map(drop)
    }

    fn set_source_mute(&self, _source: &str, _muted: bool) -> Result<(), AudioServerError> {
        self.check("set-source-mute").map(drop)
    }
}

/// Observable state of one fake sink process
#[derive(Default)]
pub struct MockProcessState {
    pub written: Mutex<Vec<u8>>,
    pub terminated: AtomicBool,
    pub input_closed: AtomicBool,
}

impl MockProcessState {
    pub fn samples(&self) -> Vec<f32> {
        self.written
            .lock()
            .unwrap()
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    pub fn is_alive(&self) -> bool {
        !self.terminated.load(Ordering::SeqCst) && !self.input_closed.load(Ordering::SeqCst)
    }
}

struct MockInput {
    state: Arc<MockProcessState>,
    write_delay: Duration,
}

impl Write for MockInput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.write_delay.is_zero() {
            std::thread::sleep(self.write_delay);
        }
        if self.state.terminated.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "process killed"));
        }
        self.state.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MockInput {
    fn drop(&mut self) {
        self.state.input_closed.store(true, Ordering::SeqCst);
    }
}

struct MockProcess {
    state: Arc<MockProcessState>,
}

impl SinkProcess for MockProcess {
    fn terminate(&self) {
        self.state.terminated.store(true, Ordering::SeqCst);
    }

    fn try_wait(&self) -> io::Result<bool> {
        Ok(!self.state.is_alive())
    }

    fn tool(&self) -> &str {
        "mock-play"
    }
}

/// Records every launched process; optionally slows writes to simulate backpressure
#[derive(Default)]
pub struct MockSinkLauncher {
    pub launched: Mutex<Vec<(StreamSpec, Arc<MockProcessState>)>>,
    pub max_alive: AtomicUsize,
    write_delay: Duration,
    unavailable: bool,
}

impl MockSinkLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_delay(delay: Duration) -> Self {
        Self {
            write_delay: delay,
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn alive_count(&self) -> usize {
        self.launched
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, p)| p.is_alive())
            .count()
    }

    pub fn process(&self, index: usize) -> Arc<MockProcessState> {
        self.launched.lock().unwrap()[index].1.clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launched.lock().unwrap().len()
    }
}

impl SinkLauncher for MockSinkLauncher {
    fn launch(&self, spec: &StreamSpec) -> Result<SinkHandle, SinkError> {
        if self.unavailable {
            return Err(SinkError::Unavailable {
                tried: "mock-play".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "not installed"),
            });
        }

        let state = Arc::new(MockProcessState::default());
        let mut launched = self.launched.lock().unwrap();
        launched.push((spec.clone(), state.clone()));
        let alive = launched.iter().filter(|(_, p)| p.is_alive()).count();
        self.max_alive.fetch_max(alive, Ordering::SeqCst);

        Ok(SinkHandle {
            input: Box::new(MockInput {
                state: state.clone(),
                write_delay: self.write_delay,
            }),
            process: Arc::new(MockProcess { state }),
        })
    }
}

/// Write a 32-bit float WAV fixture
pub fn write_wav(path: &std::path::Path, channels: u16, sample_rate: u32, samples: &[f32]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}
