//! Audio-server control through `pactl`
//!
//! Works against PulseAudio and against PipeWire via `pipewire-pulse`, which
//! speaks the same control protocol.

use crate::error::AudioServerError;
use crate::models::{ModuleId, ModuleInfo, SourceInfo};
use log::{debug, trace};
use serde::Deserialize;
use std::collections::HashMap;
use std::process::{Command, Stdio};

/// Device and module management on the host audio server.
///
/// Every successful `load_module` returns an identifier accepted by a later
/// `unload_module`. Queries have no side effects.
pub trait AudioServer: Send + Sync {
    fn default_source(&self) -> Result<String, AudioServerError>;

    fn default_sink(&self) -> Result<String, AudioServerError>;

    fn list_sources(&self) -> Result<Vec<SourceInfo>, AudioServerError>;

    fn list_modules(&self) -> Result<Vec<ModuleInfo>, AudioServerError>;

    fn load_module(&self, module: &str, args: &[String]) -> Result<ModuleId, AudioServerError>;

    fn unload_module(&self, id: &ModuleId) -> Result<(), AudioServerError>;

    /// Unload every instance of a module type. Imprecise, affects other clients.
    fn unload_modules_by_type(&self, module: &str) -> Result<(), AudioServerError>;

    fn set_default_source(&self, source: &str) -> Result<(), AudioServerError>;

    fn set_sink_volume(&self, sink: &str, percent: u32) -> Result<(), AudioServerError>;

    fn set_sink_mute(&self, sink: &str, muted: bool) -> Result<(), AudioServerError>;

    fn set_source_volume(&self, source: &str, percent: u32) -> Result<(), AudioServerError>;

    fn set_source_mute(&self, source: &str, muted: bool) -> Result<(), AudioServerError>;
}

/// [`AudioServer`] backed by the `pactl` command-line tool
#[derive(Debug, Clone)]
pub struct Pactl {
    program: String,
}

impl Pactl {
    pub fn new() -> Self {
        Self {
            program: "pactl".to_string(),
        }
    }

    /// Use a different binary, e.g. a wrapper script
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run pactl and return trimmed stdout
    fn run(&self, args: &[&str]) -> Result<String, AudioServerError> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!("audio server: {}", command);

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| AudioServerError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AudioServerError::CommandFailed { command, stderr });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        trace!("audio server replied: {}", stdout);
        Ok(stdout)
    }
}

impl Default for Pactl {
    fn default() -> Self {
        Self::new()
    }
}

fn mute_flag(muted: bool) -> &'static str {
    if muted {
        "1"
    } else {
        "0"
    }
}

impl AudioServer for Pactl {
    fn default_source(&self) -> Result<String, AudioServerError> {
        non_empty(self.run(&["get-default-source"])?, "pactl get-default-source")
    }

    fn default_sink(&self) -> Result<String, AudioServerError> {
        non_empty(self.run(&["get-default-sink"])?, "pactl get-default-sink")
    }

    fn list_sources(&self) -> Result<Vec<SourceInfo>, AudioServerError> {
        let json = self.run(&["--format=json", "list", "sources"])?;
        parse_sources(&json).map_err(|e| AudioServerError::BadOutput {
            command: "pactl --format=json list sources".to_string(),
            reason: e.to_string(),
        })
    }

    fn list_modules(&self) -> Result<Vec<ModuleInfo>, AudioServerError> {
        Ok(parse_short_modules(&self.run(&["list", "short", "modules"])?))
    }

    fn load_module(&self, module: &str, args: &[String]) -> Result<ModuleId, AudioServerError> {
        let mut argv = vec!["load-module", module];
        argv.extend(args.iter().map(String::as_str));
        let stdout = self.run(&argv)?;

        // pactl prints the new module index
        match stdout.lines().last().map(str::trim) {
            Some(id) if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) => {
                Ok(ModuleId::new(id))
            }
            _ => Err(AudioServerError::BadOutput {
                command: format!("pactl load-module {}", module),
                reason: format!("expected a module index, got '{}'", stdout),
            }),
        }
    }

    fn unload_module(&self, id: &ModuleId) -> Result<(), AudioServerError> {
        self.run(&["unload-module", id.as_str()]).map(drop)
    }

    fn unload_modules_by_type(&self, module: &str) -> Result<(), AudioServerError> {
        self.run(&["unload-module", module]).map(drop)
    }

    fn set_default_source(&self, source: &str) -> Result<(), AudioServerError> {
        self.run(&["set-default-source", source]).map(drop)
    }

    fn set_sink_volume(&self, sink: &str, percent: u32) -> Result<(), AudioServerError> {
        self.run(&["set-sink-volume", sink, &format!("{}%", percent)])
            .map(drop)
    }

    fn set_sink_mute(&self, sink: &str, muted: bool) -> Result<(), AudioServerError> {
        self.run(&["set-sink-mute", sink, mute_flag(muted)]).map(drop)
    }

    fn set_source_volume(&self, source: &str, percent: u32) -> Result<(), AudioServerError> {
        self.run(&["set-source-volume", source, &format!("{}%", percent)])
            .map(drop)
    }

    fn set_source_mute(&self, source: &str, muted: bool) -> Result<(), AudioServerError> {
        self.run(&["set-source-mute", source, mute_flag(muted)])
            .map(drop)
    }
}

fn non_empty(value: String, command: &str) -> Result<String, AudioServerError> {
    if value.is_empty() {
        Err(AudioServerError::BadOutput {
            command: command.to_string(),
            reason: "empty reply".to_string(),
        })
    } else {
        Ok(value)
    }
}

#[derive(Deserialize)]
struct JsonSource {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    properties: HashMap<String, serde_json::Value>,
}

impl JsonSource {
    fn property(&self, key: &str) -> Option<String> {
        self.properties
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Parse `pactl --format=json list sources`
pub(crate) fn parse_sources(json: &str) -> Result<Vec<SourceInfo>, serde_json::Error> {
    let sources: Vec<JsonSource> = serde_json::from_str(json)?;

    Ok(sources
        .into_iter()
        .map(|s| {
            let description = s
                .description
                .clone()
                .filter(|d| !d.is_empty())
                .or_else(|| s.property("device.description"))
                .unwrap_or_else(|| s.name.clone());
            SourceInfo {
                description,
                device_class: s.property("device.class"),
                media_class: s.property("media.class"),
                name: s.name,
            }
        })
        .collect())
}

/// Parse `pactl list short modules`: `index<TAB>name<TAB>argument[<TAB>...]`
pub(crate) fn parse_short_modules(output: &str) -> Vec<ModuleInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let id = fields.next()?.trim();
            let name = fields.next()?.trim();
            if id.is_empty() || name.is_empty() {
                return None;
            }
            let argument = fields.next().unwrap_or("").trim().to_string();
            Some(ModuleInfo {
                id: ModuleId::new(id),
                name: name.to_string(),
                argument,
            })
        })
        .collect()
}
