//! Single-stream playback engine
//!
//! The engine owns at most one live output stream. A new `play` always wins:
//! the previous stream is stopped synchronously before the next one is opened,
//! so two streams never overlap.

use crate::domain::audio::{
    ActiveStream, AudioDecoder, AudioDevice, DecodedAudio, DeviceId, OutputBackend, PlaybackClip,
};
use crate::domain::channels;
use crate::domain::device::DeviceRegistry;
use crate::domain::error::{Result, SoundboardError};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often a blocking play checks the stream and the cancel flag
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Clamp a user volume into `[0.0, 1.0]`; NaN counts as silence
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Playing,
}

/// Public view of the current session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub device_id: DeviceId,
    pub sample_rate: u32,
    pub channels: usize,
    pub volume: f32,
    pub status: SessionStatus,
}

/// Whether `play` returns immediately or waits for the clip
#[derive(Debug, Clone, Copy)]
pub enum PlayMode<'a> {
    Detached,
    /// Wait until the clip ends, or until the flag is raised
    Blocking(&'a AtomicBool),
}

/// How a `play` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Detached playback is running
    Started,
    /// Blocking playback ran to the end, or was superseded by another play
    Finished,
    /// Blocking playback was interrupted by the cancel flag
    Cancelled,
}

struct PlaybackSession {
    generation: u64,
    device_id: DeviceId,
    sample_rate: u32,
    channels: usize,
    volume: f32,
    stream: Box<dyn ActiveStream>,
}

#[derive(Default)]
struct SessionSlot {
    current: Option<PlaybackSession>,
    next_generation: u64,
}

/// Owns the single active output stream plus the selected device and volume
pub struct PlaybackEngine {
    registry: DeviceRegistry,
    output: Arc<dyn OutputBackend>,
    decoder: Arc<dyn AudioDecoder>,
    slot: Mutex<SessionSlot>,
    volume: Mutex<f32>,
    output_device: RwLock<Option<DeviceId>>,
}

impl PlaybackEngine {
    pub fn new(
        registry: DeviceRegistry,
        output: Arc<dyn OutputBackend>,
        decoder: Arc<dyn AudioDecoder>,
    ) -> Self {
        Self {
            registry,
            output,
            decoder,
            slot: Mutex::new(SessionSlot::default()),
            volume: Mutex::new(1.0),
            output_device: RwLock::new(None),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn decoder(&self) -> &Arc<dyn AudioDecoder> {
        &self.decoder
    }

    /// Decode `path` and play it on `device_id`
    ///
    /// The device is re-validated on every call. On any error no session is
    /// left behind.
    pub fn play(
        &self,
        path: &Path,
        device_id: &DeviceId,
        volume: f32,
        mode: PlayMode<'_>,
    ) -> Result<PlaybackOutcome> {
        let decoded = self.decode(path)?;
        let device = self.registry.validate_device(device_id)?;
        let volume = clamp_volume(volume);

        let generation = {
            let mut slot = self.lock_slot();
            if let Some(previous) = slot.current.take() {
                debug!(generation = previous.generation, "Superseding active stream");
                Self::teardown(previous);
            }

            let mut buffer =
                channels::adapt(decoded.buffer, usize::from(device.max_output_channels))?;
            buffer.apply_gain(volume);
            let channels = buffer.channels();

            let stream = self
                .output
                .open(
                    &device,
                    PlaybackClip {
                        buffer,
                        sample_rate: decoded.sample_rate,
                    },
                )
                .map_err(|e| {
                    warn!(device = %device.name, error = %e, "Failed to open output stream");
                    e
                })?;

            slot.next_generation += 1;
            let generation = slot.next_generation;
            slot.current = Some(PlaybackSession {
                generation,
                device_id: device.id.clone(),
                sample_rate: decoded.sample_rate,
                channels,
                volume,
                stream,
            });
            generation
        };

        info!(
            file = %path.display(),
            device = %device.name,
            volume,
            "Playing"
        );

        match mode {
            PlayMode::Detached => Ok(PlaybackOutcome::Started),
            PlayMode::Blocking(cancel) => self.wait(generation, cancel),
        }
    }

    /// Play on the selected device at the current volume
    pub fn play_selected(&self, path: &Path, mode: PlayMode<'_>) -> Result<PlaybackOutcome> {
        let device_id = self
            .output_device()
            .ok_or(SoundboardError::NoOutputDevice)?;
        self.play(path, &device_id, self.volume(), mode)
    }

    /// Stop whatever is playing; never fails
    pub fn stop(&self) {
        let previous = self.lock_slot().current.take();
        if let Some(session) = previous {
            Self::teardown(session);
            info!("Playback stopped");
        }
    }

    /// Whether the live stream is still running
    ///
    /// A stream that ended by itself is reaped here.
    pub fn is_playing(&self) -> bool {
        let mut slot = self.lock_slot();
        let active = slot
            .current
            .as_ref()
            .map(|s| s.stream.is_active())
            .unwrap_or(false);
        if !active {
            if let Some(finished) = slot.current.take() {
                match finished.stream.failure() {
                    Some(reason) => warn!(device = %finished.device_id, error = %reason, "Output stream failed"),
                    None => debug!(generation = finished.generation, "Stream ended"),
                }
                Self::teardown(finished);
            }
        }
        active
    }

    pub fn status(&self) -> SessionStatus {
        if self.is_playing() {
            SessionStatus::Playing
        } else {
            SessionStatus::Idle
        }
    }

    pub fn session(&self) -> Option<SessionInfo> {
        let slot = self.lock_slot();
        slot.current.as_ref().map(|s| SessionInfo {
            device_id: s.device_id.clone(),
            sample_rate: s.sample_rate,
            channels: s.channels,
            volume: s.volume,
            status: if s.stream.is_active() {
                SessionStatus::Playing
            } else {
                SessionStatus::Idle
            },
        })
    }

    /// Set the volume for subsequent plays; returns the clamped value
    pub fn set_volume(&self, volume: f32) -> f32 {
        let clamped = clamp_volume(volume);
        *self.volume.lock().unwrap_or_else(PoisonError::into_inner) = clamped;
        debug!(volume = clamped, "Volume set");
        clamped
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and select the output device
    pub fn set_output_device(&self, id: &DeviceId) -> Result<AudioDevice> {
        let device = self.registry.validate_device(id)?;
        *self
            .output_device
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(device.id.clone());
        info!(device = %device.name, "Output device selected");
        Ok(device)
    }

    pub fn clear_output_device(&self) {
        *self
            .output_device
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn output_device(&self) -> Option<DeviceId> {
        self.output_device
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn decode(&self, path: &Path) -> Result<DecodedAudio> {
        if !path.is_file() {
            return Err(SoundboardError::AudioFileCorrupted {
                path: path.to_path_buf(),
                reason: "file not found".to_string(),
            });
        }
        self.decoder
            .decode(path)
            .map_err(|reason| SoundboardError::AudioFileCorrupted {
                path: path.to_path_buf(),
                reason,
            })
    }

    /// Block until session `generation` ends, is superseded or is cancelled
    ///
    /// A device failure mid-clip tears the session down and is reported as
    /// `DeviceDisconnected`.
    fn wait(&self, generation: u64, cancel: &AtomicBool) -> Result<PlaybackOutcome> {
        loop {
            let mut slot = self.lock_slot();
            let ours = slot.current.as_ref().filter(|s| s.generation == generation);

            let Some(session) = ours else {
                return Ok(PlaybackOutcome::Finished);
            };
            if cancel.load(Ordering::SeqCst) {
                if let Some(session) = slot.current.take() {
                    Self::teardown(session);
                }
                return Ok(PlaybackOutcome::Cancelled);
            }
            if !session.stream.is_active() {
                let Some(reason) = session.stream.failure() else {
                    return Ok(PlaybackOutcome::Finished);
                };
                if let Some(session) = slot.current.take() {
                    warn!(device = %session.device_id, error = %reason, "Output stream failed");
                    Self::teardown(session);
                }
                return Err(SoundboardError::DeviceDisconnected(reason));
            }

            drop(slot);
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn teardown(session: PlaybackSession) {
        if let Err(e) = session.stream.stop() {
            warn!(device = %session.device_id, error = %e, "Error stopping stream");
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{output_device, FakeDecoder, FakeDevices, FakeOutput};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        engine: PlaybackEngine,
        devices: Arc<FakeDevices>,
        output: Arc<FakeOutput>,
        _dir: TempDir,
        kick: std::path::PathBuf,
        snare: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let kick = dir.path().join("kick.wav");
        let snare = dir.path().join("snare.wav");
        fs::write(&kick, b"kick").unwrap();
        fs::write(&snare, b"snare").unwrap();

        let devices = Arc::new(FakeDevices::new(vec![
            output_device("Speakers", 2),
            output_device("Microphone", 0),
        ]));
        let output = Arc::new(FakeOutput::new());
        let decoder = Arc::new(
            FakeDecoder::new()
                .with_sound("kick.wav", 1, 44100, vec![0.5, 1.0])
                .with_sound("snare.wav", 2, 48000, vec![0.2, 0.4]),
        );
        let engine = PlaybackEngine::new(
            DeviceRegistry::new(devices.clone()),
            output.clone(),
            decoder,
        );

        Fixture {
            engine,
            devices,
            output,
            _dir: dir,
            kick,
            snare,
        }
    }

    #[test]
    fn test_set_volume_clamps() {
        let f = fixture();
        assert_eq!(f.engine.set_volume(-5.0), 0.0);
        assert_eq!(f.engine.set_volume(5.0), 1.0);
        assert_eq!(f.engine.set_volume(0.5), 0.5);
        assert_eq!(f.engine.volume(), 0.5);
        assert_eq!(f.engine.set_volume(f32::NAN), 0.0);
    }

    #[test]
    fn test_play_adapts_and_scales() {
        let f = fixture();
        let outcome = f
            .engine
            .play(&f.kick, &DeviceId::new("Speakers"), 0.5, PlayMode::Detached)
            .unwrap();

        assert_eq!(outcome, PlaybackOutcome::Started);
        assert!(f.engine.is_playing());

        let opened = f.output.opened();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].channels, 2);
        assert_eq!(opened[0].sample_rate, 44100);
        assert_eq!(opened[0].samples, vec![0.25, 0.25, 0.5, 0.5]);

        let session = f.engine.session().unwrap();
        assert_eq!(session.device_id, DeviceId::new("Speakers"));
        assert_eq!(session.volume, 0.5);
        assert_eq!(session.status, SessionStatus::Playing);
    }

    #[test]
    fn test_play_unknown_device_stays_idle() {
        let f = fixture();
        let result = f
            .engine
            .play(&f.kick, &DeviceId::new("Headset"), 1.0, PlayMode::Detached);

        assert!(matches!(result, Err(SoundboardError::DeviceNotFound(_))));
        assert_eq!(f.engine.status(), SessionStatus::Idle);
        assert!(f.output.opened().is_empty());
    }

    #[test]
    fn test_play_input_only_device() {
        let f = fixture();
        let result = f
            .engine
            .play(&f.kick, &DeviceId::new("Microphone"), 1.0, PlayMode::Detached);
        assert!(matches!(result, Err(SoundboardError::DeviceNoOutput { .. })));
    }

    #[test]
    fn test_corrupted_file_does_not_disturb_current_stream() {
        let f = fixture();
        let speakers = DeviceId::new("Speakers");
        f.engine.play(&f.kick, &speakers, 1.0, PlayMode::Detached).unwrap();

        let bogus = f.kick.with_file_name("missing.wav");
        let result = f.engine.play(&bogus, &speakers, 1.0, PlayMode::Detached);
        assert!(matches!(result, Err(SoundboardError::AudioFileCorrupted { .. })));
        assert!(f.engine.is_playing());
    }

    #[test]
    fn test_second_play_supersedes_first() {
        let f = fixture();
        let speakers = DeviceId::new("Speakers");
        f.engine.play(&f.kick, &speakers, 1.0, PlayMode::Detached).unwrap();
        f.engine.play(&f.snare, &speakers, 1.0, PlayMode::Detached).unwrap();

        assert_eq!(f.output.active_count(), 1);
        let opened = f.output.opened();
        assert_eq!(opened.len(), 2);
        assert!(opened[0].stopped_before(&opened[1]));
        assert_eq!(f.engine.session().unwrap().sample_rate, 48000);
    }

    #[test]
    fn test_disconnect_on_open_leaves_no_session() {
        let f = fixture();
        let speakers = DeviceId::new("Speakers");
        f.engine.play(&f.kick, &speakers, 1.0, PlayMode::Detached).unwrap();

        f.output.fail_next_open();
        let result = f.engine.play(&f.snare, &speakers, 1.0, PlayMode::Detached);
        assert!(matches!(result, Err(SoundboardError::DeviceDisconnected(_))));
        assert!(!f.engine.is_playing());
        assert!(f.engine.session().is_none());

        // The engine recovers on the next call
        f.engine.play(&f.kick, &speakers, 1.0, PlayMode::Detached).unwrap();
        assert!(f.engine.is_playing());
    }

    #[test]
    fn test_device_removed_after_selection() {
        let f = fixture();
        f.engine.set_output_device(&DeviceId::new("Speakers")).unwrap();
        f.devices.remove("Speakers");

        let result = f.engine.play_selected(&f.kick, PlayMode::Detached);
        assert!(matches!(result, Err(SoundboardError::DeviceNotFound(_))));
    }

    #[test]
    fn test_play_selected_requires_device() {
        let f = fixture();
        let result = f.engine.play_selected(&f.kick, PlayMode::Detached);
        assert!(matches!(result, Err(SoundboardError::NoOutputDevice)));
    }

    #[test]
    fn test_natural_end_reads_as_idle() {
        let f = fixture();
        f.engine
            .play(&f.kick, &DeviceId::new("Speakers"), 1.0, PlayMode::Detached)
            .unwrap();
        f.output.finish_all();

        assert!(!f.engine.is_playing());
        assert!(f.engine.session().is_none());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let f = fixture();
        f.engine.stop();
        f.engine
            .play(&f.kick, &DeviceId::new("Speakers"), 1.0, PlayMode::Detached)
            .unwrap();
        f.engine.stop();
        f.engine.stop();
        assert_eq!(f.output.active_count(), 0);
    }

    #[test]
    fn test_stop_swallows_teardown_failure() {
        let f = fixture();
        f.output.fail_stops();
        f.engine
            .play(&f.kick, &DeviceId::new("Speakers"), 1.0, PlayMode::Detached)
            .unwrap();
        f.engine.stop();
        assert!(!f.engine.is_playing());
    }

    #[test]
    fn test_blocking_play_finishes() {
        let f = Arc::new(fixture());
        let finisher = {
            let f = f.clone();
            thread::spawn(move || {
                thread::sleep(POLL_INTERVAL * 3);
                f.output.finish_all();
            })
        };

        let cancel = AtomicBool::new(false);
        let outcome = f
            .engine
            .play(&f.kick, &DeviceId::new("Speakers"), 1.0, PlayMode::Blocking(&cancel))
            .unwrap();
        finisher.join().unwrap();

        assert_eq!(outcome, PlaybackOutcome::Finished);
    }

    #[test]
    fn test_blocking_play_cancelled() {
        let f = fixture();
        let cancel = AtomicBool::new(true);
        let outcome = f
            .engine
            .play(&f.kick, &DeviceId::new("Speakers"), 1.0, PlayMode::Blocking(&cancel))
            .unwrap();

        assert_eq!(outcome, PlaybackOutcome::Cancelled);
        assert_eq!(f.output.active_count(), 0);
    }

    #[test]
    fn test_blocking_play_reports_device_failure() {
        let f = Arc::new(fixture());
        let breaker = {
            let f = f.clone();
            thread::spawn(move || {
                thread::sleep(POLL_INTERVAL * 3);
                f.output.fail_active("device unplugged");
            })
        };

        let cancel = AtomicBool::new(false);
        let result = f
            .engine
            .play(&f.kick, &DeviceId::new("Speakers"), 1.0, PlayMode::Blocking(&cancel));
        breaker.join().unwrap();

        match result {
            Err(SoundboardError::DeviceDisconnected(reason)) => {
                assert_eq!(reason, "device unplugged");
            }
            other => panic!("expected DeviceDisconnected, got {:?}", other),
        }
        assert!(f.engine.session().is_none());
        assert!(f.output.opened()[0].is_stopped());
    }

    #[test]
    fn test_failed_detached_stream_reads_as_idle() {
        let f = fixture();
        f.engine
            .play(&f.kick, &DeviceId::new("Speakers"), 1.0, PlayMode::Detached)
            .unwrap();
        f.output.fail_active("device unplugged");

        assert!(!f.engine.is_playing());
        assert!(f.engine.session().is_none());
    }
}
