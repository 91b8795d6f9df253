//! Hotkey bindings and dispatch
//!
//! The OS listener only pushes key-combo strings onto a channel. A dedicated
//! dispatch thread drains that channel, resolves the combo to a sound, and
//! hands the file to the playback engine. Neither side waits for playback to
//! finish.

use crate::domain::catalog::SoundCatalog;
use crate::domain::error::{Result, SoundboardError};
use crate::domain::playback::{PlayMode, PlaybackEngine};
use crossbeam::channel::{select, unbounded, Receiver, Sender};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Sender half handed to a listener; each message is a bound combo string
pub type KeyEvents = Sender<String>;

/// Function keys used by [`HotkeyDispatcher::setup_defaults`], in order
pub const DEFAULT_KEYS: [&str; 10] = [
    "<f1>", "<f2>", "<f3>", "<f4>", "<f5>", "<f6>", "<f7>", "<f8>", "<f9>", "<f10>",
];

/// Canonical form of a combo string: lowercase, no whitespace
pub fn normalize_combo(combo: &str) -> String {
    combo
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// OS-level global hotkey registration
///
/// `start` registers every combo and forwards presses to `events` from the
/// listener's own thread. Only one registration is live at a time.
pub trait HotkeyListener: Send {
    fn start(&mut self, combos: &[String], events: KeyEvents) -> Result<()>;

    /// Unregister everything; safe to call when not started
    fn stop(&mut self);
}

struct DispatchWorker {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// Maps key combos to sound names and drives the listener
pub struct HotkeyDispatcher {
    catalog: Arc<SoundCatalog>,
    engine: Arc<PlaybackEngine>,
    listener: Box<dyn HotkeyListener>,
    bindings: BTreeMap<String, String>,
    worker: Option<DispatchWorker>,
}

impl HotkeyDispatcher {
    pub fn new(
        catalog: Arc<SoundCatalog>,
        engine: Arc<PlaybackEngine>,
        listener: Box<dyn HotkeyListener>,
    ) -> Self {
        Self {
            catalog,
            engine,
            listener,
            bindings: BTreeMap::new(),
            worker: None,
        }
    }

    /// Bind `combo` to `sound`; the last bind of a combo wins
    pub fn bind(&mut self, combo: &str, sound: &str) -> Result<()> {
        if !self.catalog.contains(sound) {
            warn!(sound, "Cannot bind unknown sound");
            return Err(SoundboardError::SoundNotFound(sound.to_string()));
        }
        let combo = normalize_combo(combo);
        info!(combo = %combo, sound, "Hotkey bound");
        self.bindings.insert(combo, sound.to_string());
        Ok(())
    }

    pub fn unbind(&mut self, combo: &str) -> Option<String> {
        self.bindings.remove(&normalize_combo(combo))
    }

    /// Bind F1..F10 to the first ten sounds in name order
    pub fn setup_defaults(&mut self) -> usize {
        let names = self.catalog.names();
        let mut bound = 0;
        for (key, name) in DEFAULT_KEYS.iter().zip(names) {
            self.bindings.insert(key.to_string(), name);
            bound += 1;
        }
        debug!(bound, "Default hotkeys assigned");
        bound
    }

    /// Bindings sorted by combo
    pub fn bindings(&self) -> &BTreeMap<String, String> {
        &self.bindings
    }

    pub fn binding(&self, combo: &str) -> Option<&str> {
        self.bindings.get(&normalize_combo(combo)).map(String::as_str)
    }

    /// First combo, in combo order, bound to `sound`
    pub fn hotkey_for(&self, sound: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(_, s)| s.as_str() == sound)
            .map(|(k, _)| k.as_str())
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    pub fn is_listening(&self) -> bool {
        self.worker.is_some()
    }

    /// Register all current bindings with the OS, replacing any prior listener
    pub fn start(&mut self) -> Result<()> {
        self.stop();

        if self.bindings.is_empty() {
            warn!("No hotkeys configured");
            return Err(SoundboardError::NoHotkeys);
        }

        let (events_tx, events_rx) = unbounded();
        let worker = self.spawn_worker(events_rx)?;

        let combos: Vec<String> = self.bindings.keys().cloned().collect();
        if let Err(e) = self.listener.start(&combos, events_tx) {
            warn!(error = %e, "Failed to start hotkey listener");
            Self::join_worker(worker);
            return Err(e);
        }

        self.worker = Some(worker);
        info!(count = combos.len(), "Hotkey listener started");
        Ok(())
    }

    /// Unregister hotkeys and stop dispatching; idempotent
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.listener.stop();
            Self::join_worker(worker);
            debug!("Hotkey listener stopped");
        }
    }

    fn spawn_worker(&self, events: Receiver<String>) -> Result<DispatchWorker> {
        let (shutdown, shutdown_rx) = unbounded::<()>();
        let bindings = Arc::new(self.bindings.clone());
        let catalog = self.catalog.clone();
        let engine = self.engine.clone();

        let handle = thread::Builder::new()
            .name("hotkey-dispatch".to_string())
            .spawn(move || loop {
                select! {
                    recv(events) -> msg => match msg {
                        Ok(combo) => dispatch(&combo, &bindings, &catalog, &engine),
                        Err(_) => break,
                    },
                    recv(shutdown_rx) -> _ => break,
                }
            })
            .map_err(|e| SoundboardError::HotkeyRegistration(e.to_string()))?;

        Ok(DispatchWorker { shutdown, handle })
    }

    fn join_worker(worker: DispatchWorker) {
        let _ = worker.shutdown.send(());
        if worker.handle.join().is_err() {
            warn!("Hotkey dispatch thread panicked");
        }
    }
}

impl Drop for HotkeyDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch(
    combo: &str,
    bindings: &BTreeMap<String, String>,
    catalog: &SoundCatalog,
    engine: &PlaybackEngine,
) {
    let Some(sound) = bindings.get(combo) else {
        debug!(combo, "Unbound hotkey");
        return;
    };
    let Some(path) = catalog.lookup(sound) else {
        warn!(combo, sound = %sound, "Bound sound no longer in catalog");
        return;
    };

    debug!(combo, sound = %sound, "Hotkey triggered");
    if let Err(e) = engine.play_selected(&path, PlayMode::Detached) {
        warn!(combo, sound = %sound, error = %e, "Hotkey playback failed");
    }
}
