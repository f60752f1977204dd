//! Linux Soundboard - terminal front-end
//!
//! Builds the virtual microphone, then reads commands from stdin until the
//! user quits. The original audio setup is restored on every exit path.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use linux_soundboard::{library, signals, HijackService, Settings, SharedSettings, SoundEffect};
use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

enum Command {
    Play(usize),
    Stop,
    ListSounds,
    ListDevices,
    SelectDevice(usize),
    Volume(f32),
    ToggleWakeupNoise,
    Quit,
    Help,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let head = parts.next()?;
    let arg = parts.next();

    if let Ok(n) = head.parse::<usize>() {
        return Some(Command::Play(n));
    }
    match (head, arg) {
        ("s", None) => Some(Command::Stop),
        ("l", None) => Some(Command::ListSounds),
        ("d", None) => Some(Command::ListDevices),
        ("i", Some(n)) => n.parse().ok().map(Command::SelectDevice),
        ("v", Some(p)) => p.parse::<f32>().ok().map(|p| Command::Volume(p / 100.0)),
        ("w", None) => Some(Command::ToggleWakeupNoise),
        ("q", None) => Some(Command::Quit),
        ("h" | "?", None) => Some(Command::Help),
        _ => None,
    }
}

fn print_help() {
    println!("Commands:");
    println!("  <n>          play sound n");
    println!("  s            stop playback");
    println!("  l            list sounds");
    println!("  d            list input devices");
    println!("  i <n>        use input device n as microphone");
    println!("  v <percent>  set global volume");
    println!("  w            toggle wake-up noise");
    println!("  q            quit");
}

fn print_sounds(sounds: &[SoundEffect]) {
    if sounds.is_empty() {
        println!("No sounds found.");
    }
    for (i, sound) in sounds.iter().enumerate() {
        println!("  {:>3}  {}", i + 1, sound.name);
    }
}

/// The terminal session
struct Repl {
    service: Arc<HijackService>,
    sounds: Vec<SoundEffect>,
    sound_dir: PathBuf,
    /// Settings as stored on disk, without session-only overrides
    saved: Settings,
    settings_path: PathBuf,
}

impl Repl {
    fn run(&mut self) -> Result<()> {
        print_sounds(&self.sounds);
        println!("Type h for help.");

        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            print!("> ");
            io::stdout().flush()?;

            let Some(line) = lines.next() else {
                info!("End of input");
                return Ok(());
            };
            let line = line.context("Failed to read from stdin")?;
            if line.trim().is_empty() {
                continue;
            }

            match parse_command(&line) {
                Some(Command::Quit) => return Ok(()),
                Some(command) => self.execute(command),
                None => println!("Unknown command, type h for help."),
            }
        }
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Play(n) => match n.checked_sub(1).and_then(|i| self.sounds.get(i)) {
                Some(sound) => {
                    if let Err(e) = self.service.play(sound) {
                        println!("Cannot play {}: {}", sound.name, e);
                    }
                }
                None => println!("No sound #{}", n),
            },
            Command::Stop => self.service.stop(),
            Command::ListSounds => {
                match library::scan(&self.sound_dir) {
                    Ok(sounds) => self.sounds = sounds,
                    Err(e) => warn!("{}", e),
                }
                print_sounds(&self.sounds);
            }
            Command::ListDevices => {
                let devices = match self.service.refresh_devices() {
                    Ok(devices) => devices,
                    Err(e) => {
                        println!("{}", e);
                        return;
                    }
                };
                for (i, description) in devices.keys().enumerate() {
                    println!("  {:>3}  {}", i + 1, description);
                }
            }
            Command::SelectDevice(n) => {
                let devices = self.service.list_input_devices();
                let Some(description) = n.checked_sub(1).and_then(|i| devices.keys().nth(i))
                else {
                    println!("No device #{}", n);
                    return;
                };
                match self.service.select_input_device(description) {
                    Ok(_) => {
                        println!("Microphone: {}", description);
                        self.service
                            .settings()
                            .set_selected_input_device(description.clone());
                        self.saved.selected_input_device = description.clone();
                        self.persist();
                    }
                    Err(e) => println!("Could not switch microphone: {}", e),
                }
            }
            Command::Volume(volume) => {
                let applied = self.service.settings().set_global_volume(volume);
                println!("Volume: {:.0}%", applied * 100.0);
                self.saved.global_volume = applied;
                self.persist();
            }
            Command::ToggleWakeupNoise => {
                let enabled = !self.service.settings().wakeup_noise();
                self.service.settings().set_wakeup_noise(enabled);
                println!("Wake-up noise {}", if enabled { "on" } else { "off" });
                self.saved.wakeup_noise = enabled;
                self.persist();
            }
            Command::Help => print_help(),
            Command::Quit => {}
        }
    }

    fn persist(&self) {
        if let Err(e) = self.saved.save(&self.settings_path) {
            warn!("Could not save settings: {}", e);
        }
    }
}

fn main() -> Result<()> {
    // Parse command-line arguments and initialize logging
    let args = cli::Args::parse();
    cli::init_logging(&args);

    let settings_path = Settings::default_path();
    let saved = Settings::load(&settings_path);
    let settings = args.apply(saved.clone());
    let service = Arc::new(HijackService::new(SharedSettings::new(settings.clone())));

    if args.list_devices {
        let devices = service
            .refresh_devices()
            .context("Could not list input devices")?;
        for (description, name) in devices {
            println!("{}\t{}", description, name);
        }
        return Ok(());
    }

    info!("Starting Linux Soundboard");

    // Installed before setup so an interrupt mid-build still cleans up
    let handler_service = service.clone();
    signals::on_termination(move |signal| {
        handler_service.cleanup();
        std::process::exit(signal.exit_code());
    })
    .context("Failed to install signal handler")?;

    service
        .setup(settings.input_device())
        .context("Could not create the virtual microphone")?;
    println!("Virtual microphone active. Select \"Soundboard_Microphone\" if apps don't follow the default.");

    let sound_dir = settings.sound_dir();
    let sounds = library::scan(&sound_dir).unwrap_or_else(|e| {
        warn!("{}", e);
        Vec::new()
    });
    println!("Sounds from {}", sound_dir.display());

    let mut repl = Repl {
        service: service.clone(),
        sounds,
        sound_dir,
        saved,
        settings_path,
    };
    let result = repl.run();

    service.cleanup();
    result
}
