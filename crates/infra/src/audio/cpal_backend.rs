//! CPAL-based device enumeration
//!
//! Provides a cross-platform view of the host's audio devices using the CPAL
//! library. Devices are identified by their name, as reported by the host.

use cpal::traits::{DeviceTrait, HostTrait};
use cueboard_core::domain::{AudioDevice, DeviceEnumerator, DeviceId, Result, SoundboardError};
use tracing::{debug, info, warn};

/// Host-reported name, or a placeholder when the host cannot provide one
pub(crate) fn device_name(device: &cpal::Device) -> String {
    #[allow(deprecated)]
    device
        .name()
        .unwrap_or_else(|_| "Unknown Device".to_string())
}

/// Widest channel layout among the device's output configurations
fn max_output_channels(device: &cpal::Device) -> u16 {
    device
        .supported_output_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

/// Widest channel layout among the device's input configurations
fn max_input_channels(device: &cpal::Device) -> u16 {
    device
        .supported_input_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

/// Find a device by the id [`CpalEnumerator`] assigned to it
pub(crate) fn find_device(host: &cpal::Host, id: &DeviceId) -> Result<cpal::Device> {
    host.devices()
        .map_err(|e| SoundboardError::Enumeration(e.to_string()))?
        .find(|d| device_name(d) == id.as_str())
        .ok_or_else(|| SoundboardError::DeviceNotFound(id.to_string()))
}

/// CPAL-based device enumerator
pub struct CpalEnumerator {
    host: cpal::Host,
}

impl Default for CpalEnumerator {
    fn default() -> Self {
        info!("Initializing CPAL enumerator");
        Self::new()
    }
}

impl CpalEnumerator {
    pub fn new() -> Self {
        let host = cpal::default_host();
        debug!("Using audio host: {:?}", host.id());
        Self { host }
    }
}

impl DeviceEnumerator for CpalEnumerator {
    fn devices(&self) -> Result<Vec<AudioDevice>> {
        let default_output = self.host.default_output_device().map(|d| device_name(&d));

        let cpal_devices = self
            .host
            .devices()
            .map_err(|e| SoundboardError::Enumeration(e.to_string()))?;

        let mut devices: Vec<AudioDevice> = Vec::new();
        for device in cpal_devices {
            let name = device_name(&device);
            if devices.iter().any(|d| d.name == name) {
                warn!(device = %name, "Skipping device with duplicate name");
                continue;
            }

            let info = AudioDevice {
                id: DeviceId::new(name.clone()),
                is_default_output: default_output.as_deref() == Some(name.as_str()),
                max_input_channels: max_input_channels(&device),
                max_output_channels: max_output_channels(&device),
                name,
            };
            debug!(
                device = %info.name,
                inputs = info.max_input_channels,
                outputs = info.max_output_channels,
                "Found device"
            );
            devices.push(info);
        }

        debug!("Found {} audio devices", devices.len());
        Ok(devices)
    }
}
