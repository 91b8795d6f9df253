//! End-to-end soundboard flows
//!
//! Real WAV files are written with hound and decoded by Symphonia; output and
//! device enumeration use the core's recording doubles.

use cueboard_core::domain::{
    ConfigManager, DeviceId, DeviceRegistry, HotkeyMode, PlayMode, PlaybackEngine,
    PlaybackOutcome, Settings, SoundCatalog, Soundboard, SoundboardError, SoundsWatcher,
};
use cueboard_core::testing::{output_device, FakeDevices, FakeListener, FakeOutput};
use cueboard_infra::{SymphoniaDecoder, SUPPORTED_EXTENSIONS};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const CABLE: &str = "CABLE Input (VB-Audio Virtual Cable)";

fn write_wav(dir: &Path, name: &str, channels: u16, rate: u32, value: i16, frames: usize) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for _ in 0..frames * usize::from(channels) {
        writer.write_sample(value).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

struct Rig {
    board: Soundboard,
    output: Arc<FakeOutput>,
    devices: Arc<FakeDevices>,
    listener: FakeListener,
    dir: TempDir,
}

fn rig() -> Rig {
    let dir = TempDir::new().unwrap();
    write_wav(dir.path(), "airhorn.wav", 1, 44100, 16384, 441);
    write_wav(dir.path(), "drums/rimshot.wav", 2, 48000, 8192, 480);
    fs::write(dir.path().join("broken.mp3"), b"this is not an mp3 file").unwrap();
    fs::write(dir.path().join("notes.txt"), b"not audio").unwrap();

    let decoder = Arc::new(SymphoniaDecoder::new());
    let devices = Arc::new(FakeDevices::new(vec![
        output_device("Speakers", 2),
        output_device(CABLE, 2),
        output_device("Surround", 6),
    ]));
    let output = Arc::new(FakeOutput::new());
    let engine = Arc::new(PlaybackEngine::new(
        DeviceRegistry::new(devices.clone()),
        output.clone(),
        decoder.clone(),
    ));
    let catalog = Arc::new(SoundCatalog::new(decoder, SUPPORTED_EXTENSIONS));
    let listener = FakeListener::new();
    let board = Soundboard::new(engine, catalog, Box::new(listener.clone()));
    board.set_sounds_dir(dir.path()).unwrap();

    Rig {
        board,
        output,
        devices,
        listener,
        dir,
    }
}

// ============================================================================
// CATALOG
// ============================================================================

#[test]
fn test_scan_decodes_real_files() {
    let rig = rig();

    assert_eq!(rig.board.catalog().names(), vec!["airhorn", "rimshot"]);

    let invalid = rig.board.invalid_files();
    assert_eq!(invalid.len(), 1);
    assert!(invalid[0].path.ends_with("broken.mp3"));
    assert!(!invalid[0].reason.is_empty());
}

#[test]
fn test_missing_sounds_dir_keeps_catalog() {
    let rig = rig();
    let missing = rig.dir.path().join("nope");

    assert!(matches!(
        rig.board.set_sounds_dir(&missing),
        Err(SoundboardError::SoundsDirNotFound(_))
    ));
    assert_eq!(rig.board.catalog().len(), 2);
    assert_eq!(rig.board.sounds_dir(), rig.dir.path());
}

// ============================================================================
// PLAYBACK
// ============================================================================

#[test]
fn test_mono_file_fills_stereo_cable() {
    let rig = rig();
    rig.board.auto_select_virtual_cable().unwrap();
    rig.board.set_volume(0.5);

    let outcome = rig.board.play("airhorn", PlayMode::Detached).unwrap();
    assert_eq!(outcome, PlaybackOutcome::Started);

    let opened = rig.output.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].device, CABLE);
    assert_eq!(opened[0].channels, 2);
    assert_eq!(opened[0].sample_rate, 44100);
    assert_eq!(opened[0].samples.len(), 441 * 2);
    for sample in &opened[0].samples {
        assert!((sample - 0.25).abs() < 1e-3);
    }
}

#[test]
fn test_stereo_file_tiles_onto_surround() {
    let rig = rig();
    let id = rig.board.resolve_device("Surround").unwrap();
    rig.board.set_output_device(&id).unwrap();

    rig.board.play("rimshot", PlayMode::Detached).unwrap();

    let clip = &rig.output.opened()[0];
    assert_eq!(clip.channels, 6);
    assert_eq!(clip.sample_rate, 48000);
    assert_eq!(clip.samples.len(), 480 * 6);
}

#[test]
fn test_new_play_supersedes_previous() {
    let rig = rig();
    rig.board.auto_select_virtual_cable().unwrap();

    rig.board.play("airhorn", PlayMode::Detached).unwrap();
    rig.board.play("rimshot", PlayMode::Detached).unwrap();

    let opened = rig.output.opened();
    assert_eq!(opened.len(), 2);
    assert!(opened[0].stopped_before(&opened[1]));
    assert_eq!(rig.output.active_count(), 1);
}

#[test]
fn test_device_unplugged_after_selection() {
    let rig = rig();
    rig.board.auto_select_virtual_cable().unwrap();
    rig.devices.remove(CABLE);

    assert!(matches!(
        rig.board.play("airhorn", PlayMode::Detached),
        Err(SoundboardError::DeviceNotFound(_))
    ));
    assert!(rig.output.opened().is_empty());
    assert!(!rig.board.engine().is_playing());
}

#[test]
fn test_file_removed_after_scan() {
    let rig = rig();
    rig.board.auto_select_virtual_cable().unwrap();
    fs::remove_file(rig.dir.path().join("airhorn.wav")).unwrap();

    match rig.board.play("airhorn", PlayMode::Detached) {
        Err(SoundboardError::AudioFileCorrupted { path, .. }) => {
            assert!(path.ends_with("airhorn.wav"));
        }
        other => panic!("expected AudioFileCorrupted, got {:?}", other),
    }
}

#[test]
fn test_blocking_play_cancelled() {
    let rig = rig();
    rig.board.auto_select_virtual_cable().unwrap();

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(60));
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    });

    let outcome = rig
        .board
        .play("airhorn", PlayMode::Blocking(&cancel))
        .unwrap();
    canceller.join().unwrap();

    assert_eq!(outcome, PlaybackOutcome::Cancelled);
    assert!(!rig.board.engine().is_playing());
    assert!(rig.output.opened()[0].is_stopped());
}

#[test]
fn test_device_lost_during_blocking_play() {
    let rig = rig();
    rig.board.auto_select_virtual_cable().unwrap();

    let output = rig.output.clone();
    let unplug = thread::spawn(move || {
        thread::sleep(Duration::from_millis(60));
        output.fail_active("The requested device is no longer available");
    });

    let cancel = AtomicBool::new(false);
    let result = rig.board.play("airhorn", PlayMode::Blocking(&cancel));
    unplug.join().unwrap();

    assert!(matches!(result, Err(SoundboardError::DeviceDisconnected(_))));
    assert!(!rig.board.engine().is_playing());
    assert!(rig.output.opened()[0].is_stopped());
}

// ============================================================================
// HOTKEYS
// ============================================================================

#[test]
fn test_default_hotkeys_trigger_playback() {
    let rig = rig();
    rig.board.auto_select_virtual_cable().unwrap();

    assert_eq!(rig.board.setup_defaults(), 2);
    rig.board.start_hotkeys().unwrap();
    assert_eq!(rig.listener.registered().len(), 2);

    assert!(rig.listener.press("<f2>"));
    assert!(wait_until(Duration::from_secs(2), || rig.output.opened().len() == 1));
    assert_eq!(rig.output.opened()[0].sample_rate, 48000);

    rig.board.stop_hotkeys();
    assert!(!rig.listener.is_listening());
    assert!(!rig.listener.press("<f1>"));
}

#[test]
fn test_hotkey_without_device_is_harmless() {
    let rig = rig();
    rig.board.bind("<ctrl>+<alt>+h", "airhorn").unwrap();
    rig.board.start_hotkeys().unwrap();

    assert!(rig.listener.press("<ctrl>+<alt>+h"));
    thread::sleep(Duration::from_millis(100));

    assert!(rig.output.opened().is_empty());
    assert!(rig.board.is_listening());
}

// ============================================================================
// SETTINGS
// ============================================================================

#[tokio::test]
async fn test_settings_survive_restart() {
    let config_dir = TempDir::new().unwrap();
    let manager = ConfigManager::new(config_dir.path().to_path_buf());

    let first = rig();
    first
        .board
        .set_output_device(&DeviceId::new("Speakers"))
        .unwrap();
    first.board.set_volume(0.4);
    first.board.bind("<ctrl>+r", "rimshot").unwrap();
    manager.save(&first.board.settings()).await.unwrap();

    let loaded = manager.load().await;
    assert_eq!(loaded.output_device.as_deref(), Some("Speakers"));
    assert_eq!(loaded.sounds_dir, first.dir.path());
    assert_eq!(loaded.hotkeys.len(), 1);

    let second = rig();
    let issues = second.board.apply_settings(&loaded);
    assert!(issues.is_empty(), "unexpected issues: {:?}", issues);
    assert_eq!(second.board.settings(), loaded);
    assert_eq!(second.board.engine().volume(), 0.4);
    // Merged mode regenerates F-keys in memory only
    assert_eq!(second.board.list_hotkeys().len(), 3);
}

#[tokio::test]
async fn test_unplugged_device_survives_restart() {
    let config_dir = TempDir::new().unwrap();
    let manager = ConfigManager::new(config_dir.path().to_path_buf());

    let first = rig();
    first.board.set_output_device(&DeviceId::new(CABLE)).unwrap();
    manager.save(&first.board.settings()).await.unwrap();

    // Cable missing on the next start; an unrelated change is saved
    let second = rig();
    second.devices.remove(CABLE);
    let issues = second.board.apply_settings(&manager.load().await);
    assert!(matches!(issues[0], SoundboardError::DeviceNotFound(_)));
    second.board.set_volume(0.7);
    manager.save(&second.board.settings()).await.unwrap();

    let reloaded = manager.load().await;
    assert_eq!(reloaded.output_device.as_deref(), Some(CABLE));
    assert_eq!(reloaded.volume, 0.7);
}

#[test]
fn test_apply_settings_reports_bad_values() {
    let rig = rig();
    let mut settings = Settings {
        output_device: Some("Gone Device".to_string()),
        sounds_dir: rig.dir.path().to_path_buf(),
        volume: 3.0,
        hotkey_mode: HotkeyMode::Custom,
        ..Settings::default()
    };
    settings
        .hotkeys
        .insert("<f9>".to_string(), "missing".to_string());
    settings
        .hotkeys
        .insert("<f1>".to_string(), "airhorn".to_string());

    let issues = rig.board.apply_settings(&settings);

    assert_eq!(issues.len(), 2);
    assert!(rig.board.engine().output_device().is_none());
    assert_eq!(
        rig.board.settings().output_device.as_deref(),
        Some("Gone Device")
    );
    assert_eq!(rig.board.engine().volume(), 1.0);
    assert_eq!(
        rig.board.list_hotkeys(),
        vec![("<f1>".to_string(), "airhorn".to_string())]
    );
}

// ============================================================================
// WATCHER
// ============================================================================

#[test]
fn test_watcher_picks_up_new_files() {
    let rig = rig();
    let _watcher =
        SoundsWatcher::new(rig.dir.path().to_path_buf(), rig.board.catalog().clone()).unwrap();

    write_wav(rig.dir.path(), "tada.wav", 1, 22050, 1000, 220);

    assert!(wait_until(Duration::from_secs(5), || rig
        .board
        .catalog()
        .contains("tada")));
    assert_eq!(rig.board.catalog().len(), 3);
}
