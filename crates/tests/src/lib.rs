//! Cross-crate tests for cueboard
//!
//! The core runs against its in-memory output and device doubles while files
//! are decoded by the real Symphonia adapter.

#[cfg(test)]
mod soundboard_integration;
