//! Command-line interface for Linux Soundboard
//!
//! Handles argument parsing and logging configuration.

use clap::Parser;
use linux_soundboard::Settings;
use log::LevelFilter;
use std::path::PathBuf;

/// Linux Soundboard - play sound effects through your microphone
#[derive(Parser, Debug)]
#[command(name = "linux-soundboard")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Input device to mix into the virtual microphone, by description
    #[arg(short, long, value_name = "DESCRIPTION")]
    pub device: Option<String>,

    /// Directory containing sound effects
    #[arg(short, long, value_name = "DIR")]
    pub sounds: Option<PathBuf>,

    /// Global volume (0.0 - 1.0, up to 10.0 with --boost)
    #[arg(long, value_name = "FLOAT")]
    pub volume: Option<f32>,

    /// Allow volumes above 100%
    #[arg(long)]
    pub boost: bool,

    /// Prepend a short noise floor so noise suppression does not swallow effects
    #[arg(long)]
    pub wakeup_noise: bool,

    /// Print available input devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    /// Session settings: the saved ones with command-line overrides on top
    pub fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(device) = &self.device {
            settings.selected_input_device = device.clone();
        }
        if let Some(dir) = &self.sounds {
            settings.sound_dir = Some(dir.clone());
        }
        if self.boost {
            settings.volume_boost = true;
        }
        if self.wakeup_noise {
            settings.wakeup_noise = true;
        }
        if let Some(volume) = self.volume {
            settings.global_volume = volume;
        }
        settings.global_volume = settings.clamp_volume(settings.global_volume);
        settings
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    // Library and binary share the crate name
    builder.filter_module("linux_soundboard", args.log_level());

    // Decoder internals only at -vvvv
    if args.verbose >= 4 {
        builder.filter_module("symphonia", args.log_level());
    }

    builder.format_timestamp_millis().init();
}
