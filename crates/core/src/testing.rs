//! In-memory doubles for the device, output, decoder and hotkey seams
//!
//! Compiled for this crate's tests and for downstream crates that enable the
//! `testing` feature.

use crate::domain::audio::{
    ActiveStream, AudioDecoder, AudioDevice, DecodedAudio, DeviceEnumerator, DeviceId,
    OutputBackend, PlaybackClip, SampleBuffer,
};
use crate::domain::error::{Result, SoundboardError};
use crate::domain::hotkeys::{HotkeyListener, KeyEvents};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Output-only device with the given channel count
pub fn output_device(name: &str, outputs: u16) -> AudioDevice {
    AudioDevice {
        id: DeviceId::new(name),
        name: name.to_string(),
        max_input_channels: if outputs == 0 { 1 } else { 0 },
        max_output_channels: outputs,
        is_default_output: false,
    }
}

/// Device list that tests can mutate between calls
#[derive(Default)]
pub struct FakeDevices {
    devices: Mutex<Vec<AudioDevice>>,
}

impl FakeDevices {
    pub fn new(devices: Vec<AudioDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
        }
    }

    pub fn set(&self, devices: Vec<AudioDevice>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn remove(&self, name: &str) {
        self.devices.lock().unwrap().retain(|d| d.name != name);
    }
}

impl DeviceEnumerator for FakeDevices {
    fn devices(&self) -> Result<Vec<AudioDevice>> {
        Ok(self.devices.lock().unwrap().clone())
    }
}

/// Decoder answering from a table keyed by file name
#[derive(Default)]
pub struct FakeDecoder {
    files: HashMap<String, std::result::Result<DecodedAudio, String>>,
}

impl FakeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sound(mut self, file_name: &str, channels: usize, rate: u32, samples: Vec<f32>) -> Self {
        let buffer = SampleBuffer::new(channels, samples).unwrap();
        self.files.insert(
            file_name.to_string(),
            Ok(DecodedAudio {
                buffer,
                sample_rate: rate,
            }),
        );
        self
    }

    pub fn with_corrupt(mut self, file_name: &str, reason: &str) -> Self {
        self.files.insert(file_name.to_string(), Err(reason.to_string()));
        self
    }
}

impl AudioDecoder for FakeDecoder {
    fn decode(&self, path: &Path) -> std::result::Result<DecodedAudio, String> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.files
            .get(&name)
            .cloned()
            .unwrap_or_else(|| Err(format!("unrecognized format: {}", name)))
    }
}

struct StreamState {
    active: AtomicBool,
    stopped_at: Mutex<Option<usize>>,
    failure: Mutex<Option<String>>,
}

/// What the fake output saw for one `open`
#[derive(Clone)]
pub struct OpenedClip {
    pub device: String,
    pub channels: usize,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
    opened_at: usize,
    state: Arc<StreamState>,
}

impl OpenedClip {
    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped_at.lock().unwrap().is_some()
    }

    /// True when this stream was torn down before `other` was opened
    pub fn stopped_before(&self, other: &OpenedClip) -> bool {
        matches!(*self.state.stopped_at.lock().unwrap(), Some(at) if at < other.opened_at)
    }
}

struct FakeStream {
    state: Arc<StreamState>,
    clock: Arc<AtomicUsize>,
    fail_stop: bool,
}

impl ActiveStream for FakeStream {
    fn is_active(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }

    fn failure(&self) -> Option<String> {
        self.state.failure.lock().unwrap().clone()
    }

    fn stop(self: Box<Self>) -> std::result::Result<(), String> {
        self.state.active.store(false, Ordering::SeqCst);
        *self.state.stopped_at.lock().unwrap() = Some(self.clock.fetch_add(1, Ordering::SeqCst));
        if self.fail_stop {
            Err("device already gone".to_string())
        } else {
            Ok(())
        }
    }
}

/// Output backend that records clips instead of touching hardware
#[derive(Default)]
pub struct FakeOutput {
    opened: Mutex<Vec<OpenedClip>>,
    clock: Arc<AtomicUsize>,
    fail_next: AtomicBool,
    fail_stops: AtomicBool,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<OpenedClip> {
        self.opened.lock().unwrap().clone()
    }

    pub fn active_count(&self) -> usize {
        self.opened.lock().unwrap().iter().filter(|c| c.is_active()).count()
    }

    /// Simulate every stream playing out to its end
    pub fn finish_all(&self) {
        for clip in self.opened.lock().unwrap().iter() {
            clip.state.active.store(false, Ordering::SeqCst);
        }
    }

    /// Simulate the device dying under every running stream
    pub fn fail_active(&self, reason: &str) {
        for clip in self.opened.lock().unwrap().iter().filter(|c| c.is_active()) {
            *clip.state.failure.lock().unwrap() = Some(reason.to_string());
            clip.state.active.store(false, Ordering::SeqCst);
        }
    }

    pub fn fail_next_open(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn fail_stops(&self) {
        self.fail_stops.store(true, Ordering::SeqCst);
    }
}

impl OutputBackend for FakeOutput {
    fn open(&self, device: &AudioDevice, clip: PlaybackClip) -> Result<Box<dyn ActiveStream>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SoundboardError::DeviceDisconnected(device.name.clone()));
        }

        let state = Arc::new(StreamState {
            active: AtomicBool::new(true),
            stopped_at: Mutex::new(None),
            failure: Mutex::new(None),
        });
        self.opened.lock().unwrap().push(OpenedClip {
            device: device.name.clone(),
            channels: clip.buffer.channels(),
            sample_rate: clip.sample_rate,
            samples: clip.buffer.into_samples(),
            opened_at: self.clock.fetch_add(1, Ordering::SeqCst),
            state: state.clone(),
        });

        Ok(Box::new(FakeStream {
            state,
            clock: self.clock.clone(),
            fail_stop: self.fail_stops.load(Ordering::SeqCst),
        }))
    }
}

#[derive(Default)]
struct ListenerState {
    registered: Vec<String>,
    events: Option<KeyEvents>,
    starts: usize,
    stops: usize,
}

/// Hotkey listener driven by [`FakeListener::press`]
#[derive(Clone, Default)]
pub struct FakeListener {
    state: Arc<Mutex<ListenerState>>,
    reject: Arc<Mutex<Option<String>>>,
}

impl FakeListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `start` fail on this combo
    pub fn reject(&self, combo: &str) {
        *self.reject.lock().unwrap() = Some(combo.to_string());
    }

    /// Deliver a key press as the OS would; false when not listening
    pub fn press(&self, combo: &str) -> bool {
        let state = self.state.lock().unwrap();
        match &state.events {
            Some(tx) if state.registered.iter().any(|c| c == combo) => {
                tx.send(combo.to_string()).is_ok()
            }
            _ => false,
        }
    }

    pub fn registered(&self) -> Vec<String> {
        self.state.lock().unwrap().registered.clone()
    }

    pub fn is_listening(&self) -> bool {
        self.state.lock().unwrap().events.is_some()
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }
}

impl HotkeyListener for FakeListener {
    fn start(&mut self, combos: &[String], events: KeyEvents) -> Result<()> {
        if let Some(bad) = self.reject.lock().unwrap().take() {
            if combos.contains(&bad) {
                return Err(SoundboardError::HotkeyRegistration(bad));
            }
        }
        let mut state = self.state.lock().unwrap();
        state.registered = combos.to_vec();
        state.events = Some(events);
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.registered.clear();
        state.events = None;
        state.stops += 1;
    }
}
