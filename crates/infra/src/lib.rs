//! Platform adapters for the cueboard domain
//!
//! Everything here implements a trait from `cueboard_core::domain` against a
//! real OS facility: CPAL for devices and output, Symphonia for decoding and
//! `global-hotkey` for system-wide key combos.

pub mod audio;
pub mod hotkey;

pub use audio::{CpalEnumerator, CpalOutput, SymphoniaDecoder, SUPPORTED_EXTENSIONS};
pub use hotkey::{parse_combo, run_event_loop, GlobalHotkeyListener};
