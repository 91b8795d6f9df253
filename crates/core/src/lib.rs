//! Cueboard core: a hotkey-driven soundboard
//!
//! Platform-agnostic domain logic. Hardware access goes through the traits in
//! [`domain::audio`] and [`domain::hotkeys`]; the `infra` crate implements them
//! with cpal, symphonia and global-hotkey.

pub mod domain;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use domain::*;
