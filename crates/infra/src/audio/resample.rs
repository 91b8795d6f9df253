//! Sample-rate conversion with rubato
//!
//! Used when a device cannot open a stream at the file's own rate. Clips are
//! short, so the whole clip goes through the resampler as a single chunk.

use cueboard_core::domain::SampleBuffer;
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::{debug, info};

pub struct Resampler {
    source_rate: u32,
    target_rate: u32,
}

impl Resampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        if source_rate == target_rate {
            debug!(
                "Source and target rates match ({}Hz), bypassing resampling",
                source_rate
            );
        } else {
            info!("Creating resampler: {}Hz -> {}Hz", source_rate, target_rate);
        }

        Self {
            source_rate,
            target_rate,
        }
    }

    pub fn ratio(&self) -> f64 {
        self.target_rate as f64 / self.source_rate as f64
    }

    pub fn is_bypass(&self) -> bool {
        self.source_rate == self.target_rate
    }

    /// Convert a whole clip, keeping its channel layout
    pub fn process(&self, buffer: SampleBuffer) -> Result<SampleBuffer, String> {
        if self.is_bypass() || buffer.frames() == 0 {
            return Ok(buffer);
        }
        if self.source_rate == 0 || self.target_rate == 0 {
            return Err(format!(
                "cannot resample {}Hz -> {}Hz",
                self.source_rate, self.target_rate
            ));
        }

        let channels = buffer.channels();
        let frames = buffer.frames();

        // rubato works on planar data and keeps a short delay line, so pad the
        // input to flush the tail through
        let mut resampler = FastFixedIn::<f32>::new(
            self.ratio(),
            1.0,
            PolynomialDegree::Septic,
            frames,
            channels,
        )
        .map_err(|e| format!("Failed to create resampler: {}", e))?;
        let delay = resampler.output_delay();

        let planar: Vec<Vec<f32>> = (0..channels).map(|ch| buffer.column(ch)).collect();
        let mut output = resampler
            .process(&planar, None)
            .map_err(|e| format!("Resampling failed: {}", e))?;
        let tail = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(|e| format!("Resampling failed: {}", e))?;
        for (column, rest) in output.iter_mut().zip(tail) {
            column.extend(rest);
        }

        let expected = (frames as f64 * self.ratio()).round() as usize;
        let available = output.first().map(Vec::len).unwrap_or(0);
        let end = (delay + expected).min(available);
        let start = delay.min(end);

        let mut samples = Vec::with_capacity((end - start) * channels);
        for frame in start..end {
            for column in &output {
                samples.push(column[frame]);
            }
        }

        debug!(
            input_frames = frames,
            output_frames = end - start,
            "Resampled clip"
        );
        SampleBuffer::new(channels, samples).map_err(|e| e.to_string())
    }
}
