//! Sound library discovery

use crate::models::SoundEffect;
use log::{debug, info};
use std::fs;
use std::path::Path;

/// File extensions offered as sound effects
pub const SOUND_EXTENSIONS: [&str; 7] = ["wav", "mp3", "ogg", "oga", "flac", "m4a", "aac"];

pub fn is_sound_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| SOUND_EXTENSIONS.contains(&ext.as_str()))
}

/// Sound effects in `dir`, sorted by name. The directory is created if missing.
pub fn scan(dir: &Path) -> Result<Vec<SoundEffect>, String> {
    if !dir.exists() {
        info!("Creating sound directory {}", dir.display());
        fs::create_dir_all(dir)
            .map_err(|e| format!("Failed to create sound directory: {}", e))?;
    }

    let mut effects: Vec<SoundEffect> = fs::read_dir(dir)
        .map_err(|e| format!("Failed to read sound directory: {}", e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_sound_file(path))
        .map(SoundEffect::new)
        .collect();

    effects.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.path().cmp(b.path()))
    });

    debug!("Found {} sounds in {}", effects.len(), dir.display());
    Ok(effects)
}
