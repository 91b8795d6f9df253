//! cpal output streams for one-shot clips
//!
//! Each clip gets its own output thread that owns the cpal stream for its
//! whole life. The thread reports whether the stream opened, then parks until
//! the clip has played out or the engine asks it to stop, and drops the stream
//! on the way out.

use super::cpal_backend::find_device;
use super::resample::Resampler;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SizedSample, Stream, StreamConfig};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use cueboard_core::domain::{
    ActiveStream, AudioDevice, DeviceId, OutputBackend, PlaybackClip, Result, SoundboardError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// How often the output thread checks for the end of the clip
const LIVENESS_POLL: Duration = Duration::from_millis(20);

/// Samples shared with the audio callback
struct ClipCursor {
    samples: Vec<f32>,
    position: AtomicUsize,
}

/// Liveness and error state shared with the audio callbacks
struct StreamStatus {
    active: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl StreamStatus {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            failure: Mutex::new(None),
        }
    }

    /// Record the first error and mark the stream dead
    fn fail(&self, reason: String) {
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        failure.get_or_insert(reason);
        self.active.store(false, Ordering::SeqCst);
    }

    fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Output backend that plays clips through cpal
#[derive(Default)]
pub struct CpalOutput;

impl CpalOutput {
    pub fn new() -> Self {
        Self
    }
}

impl OutputBackend for CpalOutput {
    fn open(&self, device: &AudioDevice, clip: PlaybackClip) -> Result<Box<dyn ActiveStream>> {
        let status = Arc::new(StreamStatus::new());
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let device_id = device.id.clone();
        let thread_status = status.clone();
        let handle = thread::Builder::new()
            .name("cueboard-output".to_string())
            .spawn(move || run_output(device_id, clip, thread_status, ready_tx, stop_rx))
            .map_err(|e| SoundboardError::DeviceDisconnected(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalStream {
                status,
                stop_tx,
                handle: Some(handle),
            })),
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(SoundboardError::DeviceDisconnected(reason))
            }
            Err(_) => {
                let _ = handle.join();
                Err(SoundboardError::DeviceDisconnected(
                    "output thread exited before the stream opened".to_string(),
                ))
            }
        }
    }
}

/// Handle to a clip playing on its output thread
pub struct CpalStream {
    status: Arc<StreamStatus>,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ActiveStream for CpalStream {
    fn is_active(&self) -> bool {
        self.status.active.load(Ordering::SeqCst)
    }

    fn failure(&self) -> Option<String> {
        self.status.failure()
    }

    fn stop(mut self: Box<Self>) -> std::result::Result<(), String> {
        self.status.active.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.try_send(());
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| "output thread panicked".to_string()),
            None => Ok(()),
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.status.active.store(false, Ordering::SeqCst);
            let _ = self.stop_tx.try_send(());
            let _ = handle.join();
        }
    }
}

fn run_output(
    device_id: DeviceId,
    clip: PlaybackClip,
    status: Arc<StreamStatus>,
    ready_tx: Sender<std::result::Result<(), String>>,
    stop_rx: Receiver<()>,
) {
    let stream = match open_stream(&device_id, clip, status.clone()) {
        Ok(stream) => stream,
        Err(reason) => {
            error!(device = %device_id, reason = %reason, "Cannot open output stream");
            status.active.store(false, Ordering::SeqCst);
            let _ = ready_tx.send(Err(reason));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    loop {
        match stop_rx.recv_timeout(LIVENESS_POLL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if !status.active.load(Ordering::SeqCst) {
                    // A silent buffer has been handed over after the tail
                    thread::sleep(LIVENESS_POLL);
                    break;
                }
            }
        }
    }

    drop(stream);
    debug!(device = %device_id, "Output stream closed");
}

fn open_stream(
    device_id: &DeviceId,
    clip: PlaybackClip,
    status: Arc<StreamStatus>,
) -> std::result::Result<Stream, String> {
    let host = cpal::default_host();
    let device = find_device(&host, device_id).map_err(|e| e.to_string())?;

    let channels = clip.buffer.channels();
    let ranges: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| e.to_string())?
        .filter(|r| usize::from(r.channels()) == channels)
        .collect();
    let bounds: Vec<(u32, u32)> = ranges
        .iter()
        .map(|r| (r.min_sample_rate(), r.max_sample_rate()))
        .collect();
    let rate = choose_rate(clip.sample_rate, &bounds, || {
        device
            .default_output_config()
            .map(|c| c.sample_rate())
            .map_err(|e| format!("No default output config: {}", e))
    })
    .map_err(|e| format!("{} ({} channels)", e, channels))?;
    let range = ranges
        .iter()
        .find(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
        .ok_or_else(|| format!("no output configuration at {}Hz", rate))?;

    let supported = range.clone().with_sample_rate(rate);
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();

    let samples = Resampler::new(clip.sample_rate, rate)
        .process(clip.buffer)?
        .into_samples();

    info!(
        device = %device_id,
        channels,
        rate,
        format = ?sample_format,
        "Opening output stream"
    );

    let cursor = Arc::new(ClipCursor {
        samples,
        position: AtomicUsize::new(0),
    });

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, cursor, status),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, cursor, status),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, cursor, status),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, cursor, status),
        cpal::SampleFormat::F64 => build_stream::<f64>(&device, &config, cursor, status),
        format => Err(format!("Unsupported sample format: {:?}", format)),
    }?;

    stream
        .play()
        .map_err(|e| format!("Failed to start stream: {}", e))?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    cursor: Arc<ClipCursor>,
    status: Arc<StreamStatus>,
) -> std::result::Result<Stream, String>
where
    T: SizedSample + FromSample<f32>,
{
    let error_status = status.clone();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| fill(data, &cursor, &status),
            move |err| {
                error!("Output stream error: {}", err);
                error_status.fail(err.to_string());
            },
            None,
        )
        .map_err(|e| format!("Failed to build stream: {}", e))
}

/// Copy the next slice of the clip into `data`, padding with silence
///
/// The stream is only marked finished once a whole buffer of silence has
/// been written, so the buffer carrying the tail is never cut off.
/// Pick the stream rate: the clip's own if some range allows it, else the
/// device's default output rate
fn choose_rate(
    clip_rate: u32,
    ranges: &[(u32, u32)],
    default_rate: impl FnOnce() -> std::result::Result<u32, String>,
) -> std::result::Result<u32, String> {
    let allowed = |rate: u32| ranges.iter().any(|&(min, max)| min <= rate && rate <= max);
    if allowed(clip_rate) {
        return Ok(clip_rate);
    }

    let fallback = default_rate()?;
    if allowed(fallback) {
        debug!(clip_rate, fallback, "Clip rate unsupported, using device default");
        Ok(fallback)
    } else {
        Err(format!(
            "no output configuration at {}Hz or {}Hz",
            clip_rate, fallback
        ))
    }
}

fn fill<T>(data: &mut [T], cursor: &ClipCursor, status: &StreamStatus)
where
    T: SizedSample + FromSample<f32>,
{
    let start = cursor.position.load(Ordering::Relaxed);
    let remaining = cursor.samples.len().saturating_sub(start);
    let len = data.len().min(remaining);

    for (out, sample) in data.iter_mut().zip(&cursor.samples[start..start + len]) {
        *out = T::from_sample(*sample);
    }
    for out in &mut data[len..] {
        *out = T::from_sample(0.0f32);
    }

    cursor.position.store(start + len, Ordering::Relaxed);
    if len == 0 {
        status.active.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(samples: Vec<f32>) -> ClipCursor {
        ClipCursor {
            samples,
            position: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_fill_waits_for_silent_buffer() {
        let cursor = cursor(vec![0.5; 6]);
        let status = StreamStatus::new();
        let mut data = [0.0f32; 4];

        fill(&mut data, &cursor, &status);
        assert_eq!(data, [0.5; 4]);
        assert!(status.active.load(Ordering::SeqCst));

        // Tail plus padding: still playing
        fill(&mut data, &cursor, &status);
        assert_eq!(data, [0.5, 0.5, 0.0, 0.0]);
        assert!(status.active.load(Ordering::SeqCst));

        fill(&mut data, &cursor, &status);
        assert_eq!(data, [0.0; 4]);
        assert!(!status.active.load(Ordering::SeqCst));
    }

    #[test]
    fn test_fill_converts_sample_format() {
        let cursor = cursor(vec![1.0, -1.0]);
        let status = StreamStatus::new();
        let mut data = [0i16; 2];

        fill(&mut data, &cursor, &status);
        assert!(data[0] > 32_000);
        assert!(data[1] < -32_000);
    }

    #[test]
    fn test_status_keeps_first_failure() {
        let status = StreamStatus::new();
        assert!(status.failure().is_none());

        status.fail("device unplugged".to_string());
        status.fail("stream invalidated".to_string());

        assert_eq!(status.failure().as_deref(), Some("device unplugged"));
        assert!(!status.active.load(Ordering::SeqCst));
    }

    #[test]
    fn test_choose_rate_prefers_clip_rate() {
        let rate = choose_rate(44100, &[(8000, 96000)], || panic!("default not needed"));
        assert_eq!(rate, Ok(44100));
    }

    #[test]
    fn test_choose_rate_falls_back_to_default() {
        // Device that only runs at 48 kHz
        let rate = choose_rate(22050, &[(48000, 48000)], || Ok(48000));
        assert_eq!(rate, Ok(48000));

        let rate = choose_rate(22050, &[(48000, 48000)], || Ok(44100));
        assert!(rate.is_err());
        assert!(choose_rate(22050, &[], || Err("gone".to_string())).is_err());
    }
}
