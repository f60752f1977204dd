//! Error types for the soundboard core.
//!
//! Errors are split by how the caller is expected to react:
//! - [`SetupError`]: the virtual microphone could not be built; the caller must
//!   not treat the hijack as active
//! - [`PlaybackError`], [`DeviceQueryError`], [`AssetDecodeError`]: recoverable,
//!   the operation is abandoned and prior state is left intact
//!
//! A broken pipe while streaming is not an error at all when it was caused by
//! cancellation, so it has no variant here.

use std::path::PathBuf;

/// A single audio-server command failed.
#[derive(Debug, thiserror::Error)]
pub enum AudioServerError {
    /// The control tool could not be executed.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The control tool ran but reported failure.
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The control tool produced output we could not interpret.
    #[error("unexpected output from `{command}`: {reason}")]
    BadOutput { command: String, reason: String },
}

/// Fatal errors from [`HijackService::setup`](crate::HijackService::setup).
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The audio server did not answer the basic default-device query.
    #[error("audio server unavailable (is PipeWire/PulseAudio running?): {0}")]
    AudioServerUnavailable(#[source] AudioServerError),

    /// An essential node could not be created; the partial graph was removed.
    #[error("failed to create {step}: {source}")]
    TopologyBuild {
        step: &'static str,
        #[source]
        source: AudioServerError,
    },
}

/// Errors from enumerating or resolving input devices.
#[derive(Debug, thiserror::Error)]
pub enum DeviceQueryError {
    #[error("could not query input devices: {0}")]
    Query(#[from] AudioServerError),

    #[error("no input device named '{0}'")]
    NotFound(String),
}

/// A sound asset could not be turned into an [`AudioBuffer`](crate::AudioBuffer).
#[derive(Debug, thiserror::Error)]
#[error("failed to decode {}: {reason}", path.display())]
pub struct AssetDecodeError {
    pub path: PathBuf,
    pub reason: String,
}

impl AssetDecodeError {
    pub fn new(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// No streaming tool could be started.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("no streaming tool available (tried {tried}): {source}")]
    Unavailable {
        tried: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from [`HijackService::play`](crate::HijackService::play).
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error(transparent)]
    AssetDecode(#[from] AssetDecodeError),

    #[error("playback unavailable: {0}")]
    PlaybackUnavailable(#[from] SinkError),

    /// `play` was called while no virtual microphone is active.
    #[error("virtual microphone is not set up")]
    NotReady,
}
