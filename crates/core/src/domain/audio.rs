//! Audio device abstractions and domain models
//!
//! This module defines the platform-agnostic audio interfaces the soundboard
//! is built on. Implementations backed by real hardware (cpal, symphonia) live
//! in the `infra` crate; tests substitute in-memory fakes.

use crate::domain::error::{Result, SoundboardError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Unique identifier for an audio device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of one device as reported by the host
///
/// Never cached across a playback attempt: devices can vanish between calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub id: DeviceId,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub is_default_output: bool,
}

impl AudioDevice {
    pub fn has_output(&self) -> bool {
        self.max_output_channels > 0
    }
}

/// Interleaved `f32` samples laid out as frames x channels
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: usize,
    samples: Vec<f32>,
}

impl SampleBuffer {
    /// Build a buffer from interleaved samples
    ///
    /// A trailing partial frame is dropped.
    pub fn new(channels: usize, mut samples: Vec<f32>) -> Result<Self> {
        if channels == 0 {
            return Err(SoundboardError::InvalidChannelCount(channels));
        }
        let whole = samples.len() - samples.len() % channels;
        samples.truncate(whole);
        Ok(Self { channels, samples })
    }

    /// Reshape a flat mono signal into a one-column buffer
    pub fn from_mono(samples: Vec<f32>) -> Self {
        Self {
            channels: 1,
            samples,
        }
    }

    /// Build a buffer from per-frame rows; every row must have `channels` entries
    pub fn from_frames(channels: usize, frames: &[Vec<f32>]) -> Result<Self> {
        if channels == 0 || frames.iter().any(|f| f.len() != channels) {
            return Err(SoundboardError::InvalidChannelCount(channels));
        }
        Ok(Self {
            channels,
            samples: frames.iter().flatten().copied().collect(),
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Samples of one frame, or `None` past the end
    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.channels)?;
        self.samples.get(start..start.checked_add(self.channels)?)
    }

    pub fn frames_iter(&self) -> impl Iterator<Item = &[f32]> {
        self.samples.chunks_exact(self.channels)
    }

    /// Copy out one channel
    pub fn column(&self, channel: usize) -> Vec<f32> {
        self.frames_iter().map(|f| f[channel]).collect()
    }

    /// Multiply every sample by `gain`; values are not clipped
    pub fn apply_gain(&mut self, gain: f32) {
        if gain == 1.0 {
            return;
        }
        for sample in &mut self.samples {
            *sample *= gain;
        }
    }
}

/// A fully decoded file
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub buffer: SampleBuffer,
    pub sample_rate: u32,
}

/// Everything an output backend needs to play one clip
#[derive(Debug, Clone)]
pub struct PlaybackClip {
    pub buffer: SampleBuffer,
    pub sample_rate: u32,
}

impl PlaybackClip {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.buffer.frames() as f64 / self.sample_rate as f64
    }
}

/// Trait for enumerating available audio devices
///
/// Each call must query the host afresh; enumeration is read-only and may be
/// called from several threads at once.
pub trait DeviceEnumerator: Send + Sync {
    /// List all devices in host enumeration order
    fn devices(&self) -> Result<Vec<AudioDevice>>;
}

/// Trait for decoding files into sample buffers
pub trait AudioDecoder: Send + Sync {
    /// Decode the whole file
    fn decode(&self, path: &Path) -> std::result::Result<DecodedAudio, String>;

    /// Check that the file is decodable without keeping the samples
    fn validate(&self, path: &Path) -> std::result::Result<(), String> {
        self.decode(path).map(|_| ())
    }
}

/// A live output stream owned by the playback engine
pub trait ActiveStream: Send {
    /// Whether the device is still consuming samples
    ///
    /// Turns false on its own once the clip has been played out or the
    /// device failed.
    fn is_active(&self) -> bool;

    /// Why the device stopped consuming samples, if it failed
    fn failure(&self) -> Option<String> {
        None
    }

    /// Tear the stream down and release the device
    fn stop(self: Box<Self>) -> std::result::Result<(), String>;
}

/// Trait for opening output streams on a device
pub trait OutputBackend: Send + Sync {
    /// Open `device` and start playing `clip` asynchronously
    ///
    /// Device-level failures map to [`SoundboardError::DeviceDisconnected`].
    fn open(&self, device: &AudioDevice, clip: PlaybackClip) -> Result<Box<dyn ActiveStream>>;
}
