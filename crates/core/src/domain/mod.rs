//! Domain entities and business rules

pub mod audio;
pub mod catalog;
pub mod channels;
pub mod config;
pub mod device;
pub mod error;
pub mod hotkeys;
pub mod playback;
pub mod soundboard;
pub mod watch;

pub use audio::{
    ActiveStream, AudioDecoder, AudioDevice, DecodedAudio, DeviceEnumerator, DeviceId,
    OutputBackend, PlaybackClip, SampleBuffer,
};
pub use catalog::{CatalogSnapshot, InvalidSound, ScanSummary, SoundCatalog};
pub use config::{ConfigError, ConfigManager, HotkeyMode, Settings};
pub use device::{DeviceRegistry, VIRTUAL_CABLE_KEYWORDS};
pub use error::{Result, SoundboardError};
pub use hotkeys::{normalize_combo, HotkeyDispatcher, HotkeyListener, KeyEvents, DEFAULT_KEYS};
pub use playback::{
    clamp_volume, PlayMode, PlaybackEngine, PlaybackOutcome, SessionInfo, SessionStatus,
    POLL_INTERVAL,
};
pub use soundboard::{DeviceListing, PlayAllReport, SoundListing, Soundboard};
pub use watch::SoundsWatcher;
