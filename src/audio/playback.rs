//! Sound effect playback through an external sink process
//!
//! Only one effect plays at a time. Each session gets its own worker thread
//! that writes the buffer in small chunks, applying the volume as it goes so a
//! slider change is heard within one chunk.

use crate::audio::cache::EffectCache;
use crate::audio::sink::{SinkHandle, SinkLauncher, SinkProcess, StreamSpec};
use crate::error::{PlaybackError, SinkError};
use crate::models::{AudioBuffer, SoundEffect};
use crate::settings::SharedSettings;
use log::{debug, info, warn};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

/// Samples per write, ~23 ms at 44.1 kHz
pub const CHUNK_SAMPLES: usize = 1024;

/// Fixed attenuation before user volume, keeps the mix from clipping
pub const HEADROOM: f32 = 0.9;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Gain for one chunk
pub fn chunk_gain(effect_volume: f32, global_volume: f32) -> f32 {
    HEADROOM * effect_volume * global_volume
}

/// Write `samples` as native-endian f32 in [`CHUNK_SAMPLES`] pieces.
///
/// `global_volume` is called once per chunk.
pub fn stream_chunks<W, F>(
    samples: &[f32],
    writer: &mut W,
    effect_volume: f32,
    mut global_volume: F,
) -> io::Result<()>
where
    W: Write + ?Sized,
    F: FnMut() -> f32,
{
    let mut bytes = Vec::with_capacity(CHUNK_SAMPLES * std::mem::size_of::<f32>());
    for chunk in samples.chunks(CHUNK_SAMPLES) {
        let gain = chunk_gain(effect_volume, global_volume());
        bytes.clear();
        for &sample in chunk {
            bytes.extend_from_slice(&(sample * gain).to_ne_bytes());
        }
        writer.write_all(&bytes)?;
    }
    writer.flush()
}

/// The one in-flight playback
struct PlaybackSession {
    id: Uuid,
    effect: String,
    process: Arc<dyn SinkProcess>,
}

type SessionSlot = Arc<Mutex<Option<PlaybackSession>>>;

fn lock_slot(slot: &SessionSlot) -> MutexGuard<'_, Option<PlaybackSession>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct PlaybackEngine {
    launcher: Arc<dyn SinkLauncher>,
    cache: Arc<EffectCache>,
    settings: SharedSettings,
    /// Sink the effects are played into
    target: String,
    session: SessionSlot,
}

impl PlaybackEngine {
    pub fn new(
        launcher: Arc<dyn SinkLauncher>,
        cache: Arc<EffectCache>,
        settings: SharedSettings,
        target: impl Into<String>,
    ) -> Self {
        Self {
            launcher,
            cache,
            settings,
            target: target.into(),
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Play an effect, cancelling whatever is playing
    pub fn play(&self, effect: &SoundEffect) -> Result<(), PlaybackError> {
        let buffer = self
            .cache
            .get(effect.path(), self.settings.wakeup_noise())?;

        let spec = StreamSpec {
            target: self.target.clone(),
            sample_rate: buffer.sample_rate,
            channels: 1,
        };

        let mut session = lock_slot(&self.session);
        if let Some(previous) = session.take() {
            debug!("Cancelling {}", previous.effect);
            previous.process.terminate();
        }

        let SinkHandle { input, process } = self.launcher.launch(&spec)?;
        let id = Uuid::new_v4();
        *session = Some(PlaybackSession {
            id,
            effect: effect.name.clone(),
            process: process.clone(),
        });
        drop(session);

        info!(
            "Playing: {} (vol {:.2}, {:.1}s via {})",
            effect.name,
            effect.volume,
            buffer.duration_seconds(),
            process.tool()
        );

        let worker = StreamWorker {
            id,
            buffer,
            effect_volume: effect.volume,
            settings: self.settings.clone(),
            input,
            process,
            session: self.session.clone(),
        };
        thread::Builder::new()
            .name("soundboard-playback".to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                self.cancel_session(id);
                PlaybackError::PlaybackUnavailable(SinkError::Unavailable {
                    tried: "playback worker".to_string(),
                    source: e,
                })
            })?;

        Ok(())
    }

    /// Kill the current playback, if any
    pub fn stop(&self) {
        if let Some(session) = lock_slot(&self.session).take() {
            session.process.terminate();
            info!("Playback stopped ({})", session.effect);
        }
    }

    pub fn is_playing(&self) -> bool {
        lock_slot(&self.session).is_some()
    }

    /// Name of the effect currently playing
    pub fn current_effect(&self) -> Option<String> {
        lock_slot(&self.session).as_ref().map(|s| s.effect.clone())
    }

    fn cancel_session(&self, id: Uuid) {
        let mut session = lock_slot(&self.session);
        if session.as_ref().is_some_and(|s| s.id == id) {
            if let Some(s) = session.take() {
                s.process.terminate();
            }
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct StreamWorker {
    id: Uuid,
    buffer: Arc<AudioBuffer>,
    effect_volume: f32,
    settings: SharedSettings,
    input: Box<dyn Write + Send>,
    process: Arc<dyn SinkProcess>,
    session: SessionSlot,
}

fn is_current(slot: &SessionSlot, id: Uuid) -> bool {
    lock_slot(slot).as_ref().is_some_and(|s| s.id == id)
}

impl StreamWorker {
    fn run(self) {
        let StreamWorker {
            id,
            buffer,
            effect_volume,
            settings,
            mut input,
            process,
            session,
        } = self;

        let result = stream_chunks(&buffer.samples, &mut input, effect_volume, || {
            settings.global_volume()
        });
        // Closing stdin tells the sink the stream is over
        drop(input);

        match result {
            Ok(()) => wait_for_exit(process.as_ref()),
            Err(e) if !is_current(&session, id) => debug!("Write after cancellation: {}", e),
            Err(e) => {
                warn!("Playback stream broke: {}", e);
                process.terminate();
            }
        }

        // A newer play() may own the slot by now
        let mut current = lock_slot(&session);
        if current.as_ref().is_some_and(|s| s.id == id) {
            *current = None;
            debug!("Playback finished");
        }
    }
}

fn wait_for_exit(process: &dyn SinkProcess) {
    loop {
        match process.try_wait() {
            Ok(true) => return,
            Ok(false) => thread::sleep(EXIT_POLL_INTERVAL),
            Err(e) => {
                warn!("Could not wait for {}: {}", process.tool(), e);
                return;
            }
        }
    }
}
