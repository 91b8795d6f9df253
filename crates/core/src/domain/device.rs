//! Device discovery and validation
//!
//! The registry never caches: every call re-enumerates, because virtual
//! cables and USB interfaces come and go while the soundboard is running.

use crate::domain::audio::{AudioDevice, DeviceEnumerator, DeviceId};
use crate::domain::error::{Result, SoundboardError};
use std::sync::Arc;
use tracing::{debug, info};

/// Name fragments that identify loopback / virtual cable outputs
pub const VIRTUAL_CABLE_KEYWORDS: &[&str] = &["cable", "virtual", "vb-audio", "voicemeeter"];

/// Enumerates and validates output devices
#[derive(Clone)]
pub struct DeviceRegistry {
    enumerator: Arc<dyn DeviceEnumerator>,
    cable_keywords: Vec<String>,
}

impl DeviceRegistry {
    pub fn new(enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        Self {
            enumerator,
            cable_keywords: VIRTUAL_CABLE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Replace the keywords used by [`DeviceRegistry::find_virtual_cable`]
    pub fn with_cable_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cable_keywords = keywords
            .into_iter()
            .map(|k| k.into().to_lowercase())
            .collect();
        self
    }

    pub fn cable_keywords(&self) -> &[String] {
        &self.cable_keywords
    }

    /// Fresh device list in host order
    pub fn list_devices(&self) -> Result<Vec<AudioDevice>> {
        let devices = self.enumerator.devices()?;
        debug!(count = devices.len(), "Enumerated audio devices");
        Ok(devices)
    }

    /// First output device whose name contains a cable keyword
    pub fn find_virtual_cable(&self) -> Result<Option<DeviceId>> {
        let found = self.list_devices()?.into_iter().find(|device| {
            let name = device.name.to_lowercase();
            device.has_output() && self.cable_keywords.iter().any(|k| name.contains(k.as_str()))
        });

        match &found {
            Some(device) => info!(device = %device.name, "Found virtual cable"),
            None => debug!("No virtual cable device present"),
        }

        Ok(found.map(|d| d.id))
    }

    /// Look `id` up in the current enumeration and check it can play
    pub fn validate_device(&self, id: &DeviceId) -> Result<AudioDevice> {
        let device = self
            .list_devices()?
            .into_iter()
            .find(|d| d.id == *id)
            .ok_or_else(|| SoundboardError::DeviceNotFound(id.to_string()))?;

        if !device.has_output() {
            return Err(SoundboardError::DeviceNoOutput {
                id: id.to_string(),
                name: device.name,
            });
        }

        Ok(device)
    }
}
