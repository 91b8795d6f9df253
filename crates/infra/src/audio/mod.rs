//! Audio backends built on CPAL and Symphonia
//!
//! CPAL abstracts the platform APIs:
//! - Windows: WASAPI
//! - Linux: ALSA/PulseAudio
//! - macOS: CoreAudio

pub mod cpal_backend;
pub mod decoder;
pub mod resample;
pub mod stream;

pub use cpal_backend::CpalEnumerator;
pub use decoder::{SymphoniaDecoder, SUPPORTED_EXTENSIONS};
pub use resample::Resampler;
pub use stream::{CpalOutput, CpalStream};
