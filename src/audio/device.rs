// Audio input device enumeration.
//
// Produces a one-shot list per invocation; callers re-invoke to refresh
// after permission grants change device labels.

use cpal::traits::{DeviceTrait, HostTrait};
use tracing::debug;

use crate::error::CaptureError;

use super::frame::AudioDeviceDescriptor;

/// List available audio-input devices.
///
/// Devices that report an empty identifier are excluded; those arise from
/// permission-not-yet-granted states and cannot be opened.
pub fn list_audio_inputs() -> Result<Vec<AudioDeviceDescriptor>, CaptureError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    let mut inputs = Vec::new();
    for device in devices {
        let name = match device.name() {
            Ok(name) => name,
            Err(e) => {
                debug!("Skipping unnamed input device: {}", e);
                continue;
            }
        };
        if name.trim().is_empty() {
            continue;
        }
        // cpal identifies devices by name, so the id doubles as the label
        inputs.push(AudioDeviceDescriptor {
            device_id: name.clone(),
            label: name,
        });
    }

    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_audio_inputs_excludes_empty_ids() {
        // Device availability depends on the host; the invariant we can
        // assert everywhere is that no returned descriptor is unusable.
        if let Ok(devices) = list_audio_inputs() {
            for device in devices {
                assert!(!device.device_id.trim().is_empty());
                assert!(!device.label.trim().is_empty());
            }
        }
    }
}
