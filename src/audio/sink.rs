//! External streaming sinks
//!
//! Raw mono f32 samples are piped into `pw-play`, or `paplay` when PipeWire's
//! tool is missing. Closing stdin ends the stream.

use crate::error::SinkError;
use log::{debug, warn};
use std::io::{self, Write};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

/// What the sink process should play into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    /// Node name of the target sink
    pub target: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// A running sink process, shared between the session and its worker
pub trait SinkProcess: Send + Sync {
    /// Kill the process immediately. Safe to call more than once.
    fn terminate(&self);

    /// Non-blocking exit check, reaps the process when it has exited
    fn try_wait(&self) -> io::Result<bool>;

    /// Name of the tool, for logging
    fn tool(&self) -> &str;
}

/// A freshly started sink: its input pipe and a handle to the process
pub struct SinkHandle {
    pub input: Box<dyn Write + Send>,
    pub process: Arc<dyn SinkProcess>,
}

/// Starts sink processes
pub trait SinkLauncher: Send + Sync {
    fn launch(&self, spec: &StreamSpec) -> Result<SinkHandle, SinkError>;
}

/// Supported streaming tools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkTool {
    PwPlay,
    Paplay,
}

impl SinkTool {
    pub fn program(&self) -> &'static str {
        match self {
            SinkTool::PwPlay => "pw-play",
            SinkTool::Paplay => "paplay",
        }
    }

    /// Command-line for raw native-endian f32 on stdin
    pub fn args(&self, spec: &StreamSpec) -> Vec<String> {
        let (target, format) = match self {
            SinkTool::PwPlay => (format!("--target={}", spec.target), "--format=f32"),
            SinkTool::Paplay => (format!("--device={}", spec.target), "--format=float32ne"),
        };
        vec![
            target,
            format.to_string(),
            format!("--rate={}", spec.sample_rate),
            format!("--channels={}", spec.channels),
            "--raw".to_string(),
            "-".to_string(),
        ]
    }
}

/// One streaming tool to try: the argument style and the binary to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkCommand {
    pub tool: SinkTool,
    pub program: String,
}

impl SinkCommand {
    pub fn new(tool: SinkTool) -> Self {
        Self {
            tool,
            program: tool.program().to_string(),
        }
    }

    /// Same arguments as `tool`, different binary
    pub fn with_program(tool: SinkTool, program: impl Into<String>) -> Self {
        Self {
            tool,
            program: program.into(),
        }
    }
}

/// Launches `pw-play`, falling back to `paplay`
#[derive(Debug, Clone)]
pub struct ExternalSinkLauncher {
    commands: Vec<SinkCommand>,
}

impl ExternalSinkLauncher {
    pub fn new() -> Self {
        Self::with_tools(vec![SinkTool::PwPlay, SinkTool::Paplay])
    }

    /// Try the given tools in order
    pub fn with_tools(tools: Vec<SinkTool>) -> Self {
        Self::with_commands(tools.into_iter().map(SinkCommand::new).collect())
    }

    /// Try the given commands in order
    pub fn with_commands(commands: Vec<SinkCommand>) -> Self {
        Self { commands }
    }

    fn spawn(command: &SinkCommand, spec: &StreamSpec) -> io::Result<SinkHandle> {
        let args = command.tool.args(spec);
        debug!("Spawning {} {}", command.program, args.join(" "));

        let mut child = Command::new(&command.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(io::Error::other("sink process has no stdin"));
        };

        Ok(SinkHandle {
            input: Box::new(stdin),
            process: Arc::new(ChildProcess {
                tool: command.program.clone(),
                child: Mutex::new(child),
            }),
        })
    }
}

impl Default for ExternalSinkLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkLauncher for ExternalSinkLauncher {
    fn launch(&self, spec: &StreamSpec) -> Result<SinkHandle, SinkError> {
        let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no tools configured");

        for command in &self.commands {
            match Self::spawn(command, spec) {
                Ok(handle) => return Ok(handle),
                Err(e) => {
                    warn!("Could not start {}: {}", command.program, e);
                    last_error = e;
                }
            }
        }

        let tried = self
            .commands
            .iter()
            .map(|c| c.program.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Err(SinkError::Unavailable {
            tried,
            source: last_error,
        })
    }
}

struct ChildProcess {
    tool: String,
    child: Mutex<Child>,
}

impl SinkProcess for ChildProcess {
    fn terminate(&self) {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        // Fails only if the child was already reaped
        if child.kill().is_ok() {
            let _ = child.wait();
        }
    }

    fn try_wait(&self) -> io::Result<bool> {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(child.try_wait()?.is_some())
    }

    fn tool(&self) -> &str {
        &self.tool
    }
}
