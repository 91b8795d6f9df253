//! Error taxonomy for the soundboard core
//!
//! Every error here is recoverable: operations catch them at their boundary,
//! log them, and hand them back to the command layer, which renders the
//! message together with [`SoundboardError::suggestion`].

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by soundboard operations
#[derive(Debug, Error)]
pub enum SoundboardError {
    /// The requested device id is absent from the current enumeration
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// The device exists but exposes no output channels
    #[error("Device '{name}' has no output channels")]
    DeviceNoOutput { id: String, name: String },

    /// The device failed while opening or writing the output stream
    #[error("Audio device disconnected: {0}")]
    DeviceDisconnected(String),

    /// The file could not be decoded
    #[error("Cannot decode '{}': {reason}", path.display())]
    AudioFileCorrupted { path: PathBuf, reason: String },

    /// No sound with this name exists in the catalog
    #[error("Sound not found: {0}")]
    SoundNotFound(String),

    /// Playback was requested before an output device was chosen
    #[error("No output device selected")]
    NoOutputDevice,

    /// Channel adaptation was asked for a zero-width layout
    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(usize),

    /// The sounds directory does not exist
    #[error("Sounds directory not found: {}", .0.display())]
    SoundsDirNotFound(PathBuf),

    /// The OS refused a hotkey registration
    #[error("Hotkey registration failed: {0}")]
    HotkeyRegistration(String),

    /// The listener was started without any binding
    #[error("No hotkeys configured")]
    NoHotkeys,

    /// The audio host could not list its devices
    #[error("Device enumeration failed: {0}")]
    Enumeration(String),
}

impl SoundboardError {
    /// A short, actionable hint for the user
    pub fn suggestion(&self) -> &'static str {
        match self {
            SoundboardError::DeviceNotFound(_) => {
                "Run 'cueboard devices' and pick an id from the list."
            }
            SoundboardError::DeviceNoOutput { .. } => {
                "Choose a device with at least one output channel."
            }
            SoundboardError::DeviceDisconnected(_) => {
                "Reconnect the device or select another one, then try again."
            }
            SoundboardError::AudioFileCorrupted { .. } => {
                "Re-export the file or run 'cueboard validate' for details."
            }
            SoundboardError::SoundNotFound(_) => {
                "Run 'cueboard sounds' to see the available names."
            }
            SoundboardError::NoOutputDevice => {
                "Select one with 'cueboard set-device <id>' or run 'cueboard auto'."
            }
            SoundboardError::InvalidChannelCount(_) => {
                "The output layout needs at least one channel."
            }
            SoundboardError::SoundsDirNotFound(_) => {
                "Create the directory or point 'cueboard sounds-dir' elsewhere."
            }
            SoundboardError::HotkeyRegistration(_) => {
                "Another application may own this shortcut; bind a different key."
            }
            SoundboardError::NoHotkeys => {
                "Bind keys with 'cueboard bind <key> <sound>' first."
            }
            SoundboardError::Enumeration(_) => {
                "Check that the audio service is running."
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SoundboardError>;
