//! Cueboard CLI Application

mod render;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cueboard_core::domain::{
    ConfigManager, DeviceRegistry, HotkeyMode, PlayMode, PlaybackEngine, PlaybackOutcome,
    SoundCatalog, Soundboard, SoundboardError, SoundsWatcher,
};
use cueboard_infra::{
    run_event_loop, CpalEnumerator, CpalOutput, GlobalHotkeyListener, SymphoniaDecoder,
    SUPPORTED_EXTENSIONS,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cueboard")]
#[command(about = "A soundboard that plays clips into a virtual audio cable", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file to use instead of the per-user one
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List audio devices
    Devices,
    /// List loaded sounds and their hotkeys
    Sounds,
    /// List hotkey bindings
    Hotkeys,
    /// Rescan the sounds directory and report files that cannot be played
    Validate,
    /// Play one sound and wait for it to finish
    Play { name: String },
    /// Play every sound, shuffled unless --sequential
    PlayAll {
        #[arg(long)]
        sequential: bool,
    },
    /// Select the output device by list index or name
    SetDevice { device: String },
    /// Select the first virtual cable found
    Auto,
    /// Set playback volume (0.0 - 1.0)
    Volume {
        #[arg(allow_negative_numbers = true)]
        level: f32,
    },
    /// Bind a key combo such as "<ctrl>+<alt>+a" to a sound
    Bind { key: String, sound: String },
    /// Change the sounds directory
    SoundsDir { path: PathBuf },
    /// Listen for hotkeys until Ctrl+C
    Listen {
        /// Rescan when files in the sounds directory change
        #[arg(long)]
        watch: bool,
    },
}

impl Command {
    fn persists(&self) -> bool {
        matches!(
            self,
            Command::SetDevice { .. }
                | Command::Auto
                | Command::Volume { .. }
                | Command::Bind { .. }
                | Command::SoundsDir { .. }
        )
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_soundboard() -> Soundboard {
    let decoder = Arc::new(SymphoniaDecoder::new());
    let registry = DeviceRegistry::new(Arc::new(CpalEnumerator::default()));
    let engine = Arc::new(PlaybackEngine::new(
        registry,
        Arc::new(CpalOutput::new()),
        decoder.clone(),
    ));
    let catalog = Arc::new(SoundCatalog::new(decoder, SUPPORTED_EXTENSIONS));
    Soundboard::new(engine, catalog, Box::new(GlobalHotkeyListener::new()))
}

/// Raise `flag` on the first Ctrl+C
fn cancel_on_ctrl_c(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let manager = match cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new(ConfigManager::default_config_dir()?),
    };
    let settings = manager.load().await;

    let board = Arc::new(build_soundboard());
    for issue in board.apply_settings(&settings) {
        warn!("{}", issue);
    }

    // A stored device that is unplugged right now stays selected for later
    if settings.output_device.is_none() {
        match board.auto_select_virtual_cable() {
            Ok(Some(device)) => info!(device = %device.name, "Selected virtual cable"),
            Ok(None) => info!("No virtual cable found; select a device with 'set-device'"),
            Err(e) => warn!("Device scan failed: {}", e),
        }
    }

    let persists = cli.command.persists();
    match run(cli.command, &board, settings.hotkey_mode).await {
        Ok(()) => {
            if persists {
                manager
                    .save(&board.settings())
                    .await
                    .with_context(|| format!("saving {}", manager.config_path().display()))?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => match e.downcast_ref::<SoundboardError>() {
            Some(err) => {
                eprintln!("Error: {}", err);
                eprintln!("Hint: {}", err.suggestion());
                Ok(ExitCode::FAILURE)
            }
            None => Err(e),
        },
    }
}

async fn run(command: Command, board: &Arc<Soundboard>, mode: HotkeyMode) -> anyhow::Result<()> {
    match command {
        Command::Devices => {
            print!("{}", render::devices(&board.list_devices()?));
        }
        Command::Sounds => {
            println!("Sounds in {}:", board.sounds_dir().display());
            print!("{}", render::sounds(&board.list_sounds()));
        }
        Command::Hotkeys => {
            print!("{}", render::hotkeys(&board.list_hotkeys()));
        }
        Command::Validate => {
            let summary = board.rescan()?;
            println!(
                "{} playable, {} invalid in {}",
                summary.valid,
                summary.invalid,
                board.sounds_dir().display()
            );
            print!("{}", render::invalid(&board.invalid_files()));
        }
        Command::Play { name } => {
            let cancel = Arc::new(AtomicBool::new(false));
            cancel_on_ctrl_c(cancel.clone());

            let worker = board.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                worker.play(&name, PlayMode::Blocking(&cancel))
            })
            .await??;
            if outcome == PlaybackOutcome::Cancelled {
                println!("Stopped.");
            }
        }
        Command::PlayAll { sequential } => {
            let cancel = Arc::new(AtomicBool::new(false));
            cancel_on_ctrl_c(cancel.clone());

            let worker = board.clone();
            let report =
                tokio::task::spawn_blocking(move || worker.play_all(!sequential, &cancel))
                    .await??;
            println!(
                "Played {} sounds, {} failed{}",
                report.played,
                report.failed,
                if report.cancelled { " (interrupted)" } else { "" }
            );
        }
        Command::SetDevice { device } => {
            let id = board.resolve_device(&device)?;
            let device = board.set_output_device(&id)?;
            println!("Output device: {}", device.name);
        }
        Command::Auto => match board.auto_select_virtual_cable()? {
            Some(device) => println!("Output device: {}", device.name),
            None => println!("No virtual cable found."),
        },
        Command::Volume { level } => {
            let applied = board.set_volume(level);
            println!("Volume: {:.0}%", applied * 100.0);
        }
        Command::Bind { key, sound } => {
            board.bind(&key, &sound)?;
            println!("{} -> {}", key, sound);
            if mode == HotkeyMode::Default {
                println!("Note: hotkey_mode is 'default'; custom bindings are not loaded.");
            }
        }
        Command::SoundsDir { path } => {
            let summary = board.set_sounds_dir(&path)?;
            println!(
                "Loaded {} sounds from {} ({} invalid)",
                summary.valid,
                path.display(),
                summary.invalid
            );
        }
        Command::Listen { watch } => listen(board, watch).await?,
    }
    Ok(())
}

async fn listen(board: &Arc<Soundboard>, watch: bool) -> anyhow::Result<()> {
    board.ensure_output_device()?;

    let _watcher = if watch {
        Some(
            SoundsWatcher::new(board.sounds_dir(), board.catalog().clone())
                .context("watching sounds directory")?,
        )
    } else {
        None
    };

    let stop = Arc::new(AtomicBool::new(false));
    cancel_on_ctrl_c(stop.clone());

    // On macOS registration completes inside the event loop, so it has to be
    // requested from another thread while this one runs the loop
    let worker = board.clone();
    let abort = stop.clone();
    let starting = tokio::task::spawn_blocking(move || {
        let started = worker.start_hotkeys();
        match &started {
            Ok(()) => {
                print!("{}", render::hotkeys(&worker.list_hotkeys()));
                println!("Listening for hotkeys, press Ctrl+C to quit.");
            }
            Err(_) => abort.store(true, Ordering::SeqCst),
        }
        started
    });

    run_event_loop(&stop);
    starting.await??;
    info!("Shutting down");
    board.stop_hotkeys();
    board.stop();
    Ok(())
}
