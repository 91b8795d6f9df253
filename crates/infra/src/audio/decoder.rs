//! Audio decoding using Symphonia
//!
//! Decodes whole files into interleaved `f32` buffers for one-shot playback.

use cueboard_core::domain::{AudioDecoder, DecodedAudio, SampleBuffer};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer as SymphoniaBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, trace};

/// Extensions the symphonia feature set in this workspace can decode
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "flac", "ogg", "mp3", "m4a", "aac"];

struct OpenFile {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: Option<u32>,
}

impl OpenFile {
    fn open(path: &Path) -> Result<Self, String> {
        let file = File::open(path).map_err(|e| format!("Failed to open file: {}", e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // Create a hint using the file extension
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| format!("Failed to probe file format: {}", e))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| "No audio track found".to_string())?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate;
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| format!("Failed to create decoder: {}", e))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
        })
    }

    /// Decode the next packet of our track into `out`
    ///
    /// Returns the packet's (channels, rate), or None at end of stream.
    fn decode_next(&mut self, out: &mut Vec<f32>) -> Result<Option<(usize, u32)>, String> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(format!("Failed to read packet: {}", e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut buffer = SymphoniaBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    out.extend_from_slice(buffer.samples());
                    return Ok(Some((spec.channels.count(), spec.rate)));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    trace!("Decode error (skipping packet): {}", e);
                    continue;
                }
                Err(e) => return Err(format!("Decode failed: {}", e)),
            }
        }
    }
}

/// Symphonia-backed implementation of [`AudioDecoder`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedAudio, String> {
        let mut file = OpenFile::open(path)?;
        let mut samples = Vec::new();

        let (channels, packet_rate) = file
            .decode_next(&mut samples)?
            .ok_or_else(|| "No audio frames".to_string())?;
        while file.decode_next(&mut samples)?.is_some() {}

        let sample_rate = file.sample_rate.unwrap_or(packet_rate);
        let buffer = SampleBuffer::new(channels, samples).map_err(|e| e.to_string())?;
        if buffer.frames() == 0 {
            return Err("No audio frames".to_string());
        }

        debug!(
            path = %path.display(),
            channels,
            sample_rate,
            frames = buffer.frames(),
            "Decoded file"
        );
        Ok(DecodedAudio {
            buffer,
            sample_rate,
        })
    }

    /// Probe the container and decode the first packet only
    fn validate(&self, path: &Path) -> Result<(), String> {
        let mut file = OpenFile::open(path)?;
        let mut samples = Vec::new();
        match file.decode_next(&mut samples)? {
            Some(_) => Ok(()),
            None => Err("No audio frames".to_string()),
        }
    }
}
