//! Channel-count adaptation between decoded files and output devices

use crate::domain::audio::SampleBuffer;
use crate::domain::error::{Result, SoundboardError};
use tracing::trace;

/// Reshape `buffer` so it has exactly `target` channels
///
/// - equal counts pass through untouched
/// - wider sources keep their first `target` channels (no downmix)
/// - narrower sources repeat the whole channel set `target / source` times,
///   and any columns still missing are filled with silence
pub fn adapt(buffer: SampleBuffer, target: usize) -> Result<SampleBuffer> {
    if target == 0 {
        return Err(SoundboardError::InvalidChannelCount(target));
    }

    let source = buffer.channels();
    if source == target {
        return Ok(buffer);
    }

    trace!(source, target, frames = buffer.frames(), "Adapting channel layout");

    let mut out = Vec::with_capacity(buffer.frames() * target);
    if source > target {
        for frame in buffer.frames_iter() {
            out.extend_from_slice(&frame[..target]);
        }
    } else {
        let tiles = target / source;
        let silent = target - tiles * source;
        for frame in buffer.frames_iter() {
            for _ in 0..tiles {
                out.extend_from_slice(frame);
            }
            out.extend(std::iter::repeat(0.0).take(silent));
        }
    }

    SampleBuffer::new(target, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stereo() -> SampleBuffer {
        SampleBuffer::from_frames(2, &[vec![0.1, 0.2], vec![0.3, 0.4]]).unwrap()
    }

    #[test]
    fn test_passthrough() {
        let adapted = adapt(stereo(), 2).unwrap();
        assert_eq!(adapted, stereo());
    }

    #[test]
    fn test_truncates_wide_source() {
        let six = SampleBuffer::new(6, (0..12).map(|i| i as f32).collect()).unwrap();
        let adapted = adapt(six, 2).unwrap();
        assert_eq!(adapted.samples(), &[0.0, 1.0, 6.0, 7.0]);
    }

    #[test]
    fn test_mono_fills_every_channel() {
        let mono = SampleBuffer::from_mono(vec![0.5, -0.5]);
        let adapted = adapt(mono, 2).unwrap();
        assert_eq!(adapted.samples(), &[0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn test_uneven_target_pads_with_silence() {
        let adapted = adapt(stereo(), 5).unwrap();
        assert_eq!(adapted.channels(), 5);
        assert_eq!(adapted.frame(0), Some(&[0.1, 0.2, 0.1, 0.2, 0.0][..]));
        assert_eq!(adapted.frame(1), Some(&[0.3, 0.4, 0.3, 0.4, 0.0][..]));
        assert_eq!(adapted.frame(2), None);
    }

    #[test]
    fn test_narrow_target_below_one_tile() {
        let three = SampleBuffer::new(3, vec![1.0, 2.0, 3.0]).unwrap();
        let adapted = adapt(three, 4).unwrap();
        assert_eq!(adapted.samples(), &[1.0, 2.0, 3.0, 0.0]);
    }

    #[test]
    fn test_zero_target_is_rejected() {
        assert!(matches!(
            adapt(stereo(), 0),
            Err(SoundboardError::InvalidChannelCount(0))
        ));
    }

    fn buffer_strategy() -> impl Strategy<Value = SampleBuffer> {
        (1usize..6, 0usize..16).prop_flat_map(|(channels, frames)| {
            prop::collection::vec(-1.0f32..1.0, channels * frames)
                .prop_map(move |samples| SampleBuffer::new(channels, samples).unwrap())
        })
    }

    proptest! {
        #[test]
        fn prop_output_has_target_channels(buffer in buffer_strategy(), target in 1usize..9) {
            let frames = buffer.frames();
            let adapted = adapt(buffer, target).unwrap();
            prop_assert_eq!(adapted.channels(), target);
            prop_assert_eq!(adapted.frames(), frames);
        }

        #[test]
        fn prop_columns_follow_tiling_rule(buffer in buffer_strategy(), target in 1usize..9) {
            let source = buffer.channels();
            let adapted = adapt(buffer.clone(), target).unwrap();
            let tiled = if source >= target { target } else { (target / source) * source };
            for ch in 0..target {
                let expected = if ch < tiled {
                    buffer.column(ch % source)
                } else {
                    vec![0.0; buffer.frames()]
                };
                prop_assert_eq!(adapted.column(ch), expected);
            }
        }
    }
}
