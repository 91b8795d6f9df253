//! Soundboard facade used by the command layer
//!
//! Ties the catalog, the playback engine and the hotkey dispatcher together
//! and exposes the operations a front end calls. Every operation returns a
//! typed error the caller can render; none of them aborts the process.

use crate::domain::audio::{AudioDevice, DeviceId};
use crate::domain::catalog::{InvalidSound, ScanSummary, SoundCatalog};
use crate::domain::config::{HotkeyMode, Settings};
use crate::domain::error::{Result, SoundboardError};
use crate::domain::hotkeys::{normalize_combo, HotkeyDispatcher, HotkeyListener};
use crate::domain::playback::{PlayMode, PlaybackEngine, PlaybackOutcome};
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// One row of the sound list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundListing {
    pub name: String,
    pub hotkey: Option<String>,
}

/// One row of the device list
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceListing {
    pub index: usize,
    pub device: AudioDevice,
    pub is_selected: bool,
}

/// Result of [`Soundboard::play_all`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayAllReport {
    pub played: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub struct Soundboard {
    engine: Arc<PlaybackEngine>,
    catalog: Arc<SoundCatalog>,
    dispatcher: Mutex<HotkeyDispatcher>,
    sounds_dir: RwLock<PathBuf>,
    hotkey_mode: RwLock<HotkeyMode>,
    /// Stored device that was absent at load; kept until replaced
    pending_device: RwLock<Option<DeviceId>>,
    /// User bindings as persisted, without the generated defaults
    custom_hotkeys: RwLock<BTreeMap<String, String>>,
}

impl Soundboard {
    pub fn new(
        engine: Arc<PlaybackEngine>,
        catalog: Arc<SoundCatalog>,
        listener: Box<dyn HotkeyListener>,
    ) -> Self {
        let dispatcher = HotkeyDispatcher::new(catalog.clone(), engine.clone(), listener);
        Self {
            engine,
            catalog,
            dispatcher: Mutex::new(dispatcher),
            sounds_dir: RwLock::new(Settings::default().sounds_dir),
            hotkey_mode: RwLock::new(HotkeyMode::default()),
            pending_device: RwLock::new(None),
            custom_hotkeys: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<PlaybackEngine> {
        &self.engine
    }

    pub fn catalog(&self) -> &Arc<SoundCatalog> {
        &self.catalog
    }

    pub fn sounds_dir(&self) -> PathBuf {
        self.sounds_dir
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rescan the current sounds directory
    pub fn rescan(&self) -> Result<ScanSummary> {
        self.catalog.scan(&self.sounds_dir())
    }

    /// Scan `dir` and make it the sounds directory if the scan succeeds
    pub fn set_sounds_dir(&self, dir: &Path) -> Result<ScanSummary> {
        let summary = self.catalog.scan(dir)?;
        *self
            .sounds_dir
            .write()
            .unwrap_or_else(PoisonError::into_inner) = dir.to_path_buf();
        Ok(summary)
    }

    /// Play a catalog sound on the selected device
    pub fn play(&self, name: &str, mode: PlayMode<'_>) -> Result<PlaybackOutcome> {
        let path = self.catalog.lookup(name).ok_or_else(|| {
            warn!(sound = name, "Sound not found");
            SoundboardError::SoundNotFound(name.to_string())
        })?;

        self.ensure_output_device()?;
        self.engine.play_selected(&path, mode).map_err(|e| {
            warn!(sound = name, error = %e, "Playback failed");
            e
        })
    }

    /// Play every sound one after another, shuffled or in name order
    ///
    /// Stops early when `cancel` is raised. Individual failures are counted
    /// and skipped.
    pub fn play_all(&self, shuffle: bool, cancel: &AtomicBool) -> Result<PlayAllReport> {
        self.ensure_output_device()?;

        let mut names = self.catalog.names();
        if shuffle {
            names.shuffle(&mut rand::thread_rng());
        }
        info!(count = names.len(), shuffle, "Playing all sounds");

        let mut report = PlayAllReport::default();
        for name in &names {
            if cancel.load(Ordering::SeqCst) {
                report.cancelled = true;
                break;
            }
            match self.play(name, PlayMode::Blocking(cancel)) {
                Ok(PlaybackOutcome::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Ok(_) => report.played += 1,
                Err(_) => report.failed += 1,
            }
        }

        if report.cancelled {
            self.engine.stop();
            info!(played = report.played, "Play-all interrupted");
        }
        Ok(report)
    }

    pub fn stop(&self) {
        self.engine.stop();
    }

    /// Sounds in name order with their first hotkey
    pub fn list_sounds(&self) -> Vec<SoundListing> {
        let dispatcher = self.lock_dispatcher();
        self.catalog
            .names()
            .into_iter()
            .map(|name| SoundListing {
                hotkey: dispatcher.hotkey_for(&name).map(str::to_string),
                name,
            })
            .collect()
    }

    /// Bindings sorted by combo
    pub fn list_hotkeys(&self) -> Vec<(String, String)> {
        self.lock_dispatcher()
            .bindings()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn invalid_files(&self) -> Vec<InvalidSound> {
        self.catalog.invalid_files()
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceListing>> {
        let selected = self.engine.output_device();
        Ok(self
            .engine
            .registry()
            .list_devices()?
            .into_iter()
            .enumerate()
            .map(|(index, device)| DeviceListing {
                index,
                is_selected: selected.as_ref() == Some(&device.id),
                device,
            })
            .collect())
    }

    /// Accept either a list index or an exact device id
    pub fn resolve_device(&self, key: &str) -> Result<DeviceId> {
        let devices = self.engine.registry().list_devices()?;
        if let Ok(index) = key.parse::<usize>() {
            if let Some(device) = devices.get(index) {
                return Ok(device.id.clone());
            }
        }
        devices
            .into_iter()
            .find(|d| d.id.as_str() == key || d.name == key)
            .map(|d| d.id)
            .ok_or_else(|| SoundboardError::DeviceNotFound(key.to_string()))
    }

    pub fn set_output_device(&self, id: &DeviceId) -> Result<AudioDevice> {
        let device = self.engine.set_output_device(id).map_err(|e| {
            warn!(device = %id, error = %e, "Cannot select output device");
            e
        })?;
        *self
            .pending_device
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        Ok(device)
    }

    /// The device to persist: the selected one, else the one still awaited
    pub fn configured_device(&self) -> Option<DeviceId> {
        self.engine.output_device().or_else(|| {
            self.pending_device
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }

    /// The selected device, retrying a stored device that was missing
    pub fn ensure_output_device(&self) -> Result<DeviceId> {
        self.reconnect_pending();
        if let Some(id) = self.engine.output_device() {
            return Ok(id);
        }
        match self.configured_device() {
            Some(pending) => Err(SoundboardError::DeviceNotFound(pending.to_string())),
            None => Err(SoundboardError::NoOutputDevice),
        }
    }

    fn reconnect_pending(&self) {
        if self.engine.output_device().is_some() {
            return;
        }
        let pending = self
            .pending_device
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(id) = pending {
            match self.engine.set_output_device(&id) {
                Ok(_) => {
                    *self
                        .pending_device
                        .write()
                        .unwrap_or_else(PoisonError::into_inner) = None;
                }
                Err(e) => debug!(device = %id, error = %e, "Stored device still unavailable"),
            }
        }
    }

    /// Select the first virtual cable, if any
    pub fn auto_select_virtual_cable(&self) -> Result<Option<AudioDevice>> {
        match self.engine.registry().find_virtual_cable()? {
            Some(id) => self.set_output_device(&id).map(Some),
            None => Ok(None),
        }
    }

    pub fn set_volume(&self, volume: f32) -> f32 {
        self.engine.set_volume(volume)
    }

    /// Bind `combo` for this session and remember it for the settings file
    pub fn bind(&self, combo: &str, sound: &str) -> Result<()> {
        self.lock_dispatcher().bind(combo, sound)?;
        self.custom_hotkeys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize_combo(combo), sound.to_string());
        Ok(())
    }

    pub fn setup_defaults(&self) -> usize {
        self.lock_dispatcher().setup_defaults()
    }

    pub fn start_hotkeys(&self) -> Result<()> {
        self.reconnect_pending();
        self.lock_dispatcher().start()
    }

    pub fn stop_hotkeys(&self) {
        self.lock_dispatcher().stop();
    }

    pub fn is_listening(&self) -> bool {
        self.lock_dispatcher().is_listening()
    }

    /// Load externally stored values
    ///
    /// Problems with individual values are logged and returned; the rest of
    /// the settings still apply.
    pub fn apply_settings(&self, settings: &Settings) -> Vec<SoundboardError> {
        let mut issues = Vec::new();

        self.engine.set_volume(settings.volume);
        *self
            .hotkey_mode
            .write()
            .unwrap_or_else(PoisonError::into_inner) = settings.hotkey_mode;

        *self
            .sounds_dir
            .write()
            .unwrap_or_else(PoisonError::into_inner) = settings.sounds_dir.clone();
        if let Err(e) = self.rescan() {
            issues.push(e);
        }

        match &settings.output_device {
            Some(id) => {
                let id = DeviceId::new(id.clone());
                if let Err(e) = self.set_output_device(&id) {
                    self.engine.clear_output_device();
                    *self
                        .pending_device
                        .write()
                        .unwrap_or_else(PoisonError::into_inner) = Some(id);
                    issues.push(e);
                }
            }
            None => {
                self.engine.clear_output_device();
                *self
                    .pending_device
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = None;
            }
        }

        let custom: BTreeMap<String, String> = settings
            .hotkeys
            .iter()
            .map(|(combo, sound)| (normalize_combo(combo), sound.clone()))
            .collect();
        *self
            .custom_hotkeys
            .write()
            .unwrap_or_else(PoisonError::into_inner) = custom.clone();

        let mut dispatcher = self.lock_dispatcher();
        dispatcher.clear();
        if settings.hotkey_mode != HotkeyMode::Custom {
            dispatcher.setup_defaults();
        }
        if settings.hotkey_mode != HotkeyMode::Default {
            for (combo, sound) in &custom {
                if let Err(e) = dispatcher.bind(combo, sound) {
                    issues.push(e);
                }
            }
        }

        issues
    }

    /// Current values for the external store
    pub fn settings(&self) -> Settings {
        Settings {
            output_device: self.configured_device().map(|id| id.as_str().to_string()),
            sounds_dir: self.sounds_dir(),
            volume: self.engine.volume(),
            hotkeys: self
                .custom_hotkeys
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            hotkey_mode: *self
                .hotkey_mode
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn lock_dispatcher(&self) -> MutexGuard<'_, HotkeyDispatcher> {
        self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
