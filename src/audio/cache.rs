//! Decoded sound effects, memoized per file
//!
//! Buffers are mono, peak-normalized and optionally start with a short noise
//! floor. Entries live for the whole process; the library is small and
//! curated by the user.

use crate::audio::decode::decode_file;
use crate::error::AssetDecodeError;
use crate::models::AudioBuffer;
use log::{debug, info};
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Standard deviation of the wake-up noise
const WAKEUP_NOISE_LEVEL: f32 = 0.005;
/// Wake-up noise length as a fraction of a second
const WAKEUP_NOISE_FRACTION: u32 = 10;

struct CacheEntry {
    buffer: Arc<AudioBuffer>,
    wakeup_noise: bool,
}

#[derive(Default)]
pub struct EffectCache {
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl EffectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer for `path`, decoding it on first use.
    ///
    /// An entry built with a different `wakeup_noise` setting is rebuilt.
    /// Decode failures are not cached.
    pub fn get(&self, path: &Path, wakeup_noise: bool) -> Result<Arc<AudioBuffer>, AssetDecodeError> {
        let key = cache_key(path);

        if let Some(entry) = self.lock().get(&key) {
            if entry.wakeup_noise == wakeup_noise {
                return Ok(entry.buffer.clone());
            }
        }

        // Decode without holding the lock so other effects stay playable
        let decoded = decode_file(&key)?;
        info!(
            "Loaded {} ({} ch, {} Hz)",
            key.display(),
            decoded.channels,
            decoded.sample_rate
        );

        let sample_rate = decoded.sample_rate;
        let mut samples = decoded.into_mono();
        normalize_peak(&mut samples);
        if wakeup_noise {
            debug!("Prepending wake-up noise to {}", key.display());
            let mut with_noise = wakeup_noise_floor(sample_rate);
            with_noise.extend_from_slice(&samples);
            samples = with_noise;
        }

        let buffer = Arc::new(AudioBuffer {
            samples,
            sample_rate,
        });
        self.lock().insert(
            key,
            CacheEntry {
                buffer: buffer.clone(),
                wakeup_noise,
            },
        );
        Ok(buffer)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains_key(&cache_key(path))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn cache_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Scale so the loudest sample hits full scale. Silence is left alone.
pub fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    if peak > 0.0 {
        for s in samples.iter_mut() {
            *s /= peak;
        }
    }
}

/// ~100 ms of faint gaussian noise. Noise suppressors gate sound that starts
/// from pure silence; this opens the gate before the effect begins.
pub fn wakeup_noise_floor(sample_rate: u32) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    let len = (sample_rate / WAKEUP_NOISE_FRACTION) as usize;
    (0..len)
        .map(|_| {
            // Box-Muller
            let u1: f32 = 1.0 - rng.gen::<f32>();
            let u2: f32 = rng.gen();
            (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos() * WAKEUP_NOISE_LEVEL
        })
        .collect()
}
