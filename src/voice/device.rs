//! Audio device selection and availability probing

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SampleFormat, SampleRate, SupportedStreamConfig, SupportedStreamConfigRange};

use crate::config::RuntimeConfig;
use crate::{Error, Result};

/// Checks whether usable input hardware is present
pub trait DeviceProbe {
    /// True when the selected input device exists and can capture
    fn input_available(&self) -> bool;

    /// Pick up a changed device selector
    fn update_config(&mut self, _config: &RuntimeConfig) {}
}

/// Whether a selector means "use the host default"
fn is_default(selector: &str) -> bool {
    let selector = selector.trim();
    selector.is_empty() || selector.eq_ignore_ascii_case("default")
}

fn name_matches(device: &Device, selector: &str) -> bool {
    device
        .name()
        .map(|name| name.to_lowercase().contains(&selector.trim().to_lowercase()))
        .unwrap_or(false)
}

/// Resolve an input device from a selector (`default` or part of a device name)
///
/// # Errors
///
/// Returns error if no matching device exists
pub fn find_input_device(host: &Host, selector: &str) -> Result<Device> {
    if is_default(selector) {
        return host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()));
    }

    host.input_devices()
        .map_err(|e| Error::Device(e.to_string()))?
        .find(|d| name_matches(d, selector))
        .ok_or_else(|| Error::Device(format!("input device not found: {selector}")))
}

/// Resolve an output device from a selector
///
/// # Errors
///
/// Returns error if no matching device exists
pub fn find_output_device(host: &Host, selector: &str) -> Result<Device> {
    if is_default(selector) {
        return host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()));
    }

    host.output_devices()
        .map_err(|e| Error::Device(e.to_string()))?
        .find(|d| name_matches(d, selector))
        .ok_or_else(|| Error::Device(format!("output device not found: {selector}")))
}

/// Sample formats the capture and playback streams can convert
const fn is_convertible(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16)
}

/// Pick a stream config for the wanted rate
///
/// Configs that support `rate` exactly win, then `f32` over `i16`, then fewer
/// channels. When no config covers `rate` the closest supported rate is used
/// and the caller resamples.
#[must_use]
pub fn choose_config(
    ranges: impl IntoIterator<Item = SupportedStreamConfigRange>,
    rate: u32,
) -> Option<SupportedStreamConfig> {
    let wanted = SampleRate(rate);

    let best = ranges
        .into_iter()
        .filter(|range| is_convertible(range.sample_format()))
        .min_by_key(|range| {
            let covers = range.min_sample_rate() <= wanted && range.max_sample_rate() >= wanted;
            (
                !covers,
                range.sample_format() != SampleFormat::F32,
                range.channels(),
            )
        })?;

    let clamped = wanted.clamp(best.min_sample_rate(), best.max_sample_rate());
    Some(best.with_sample_rate(clamped))
}

/// Names of the devices the host exposes, as `(inputs, outputs)`
///
/// # Errors
///
/// Returns error if the host cannot enumerate devices
pub fn list_devices() -> Result<(Vec<String>, Vec<String>)> {
    let host = cpal::default_host();

    let inputs = host
        .input_devices()
        .map_err(|e| Error::Device(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();
    let outputs = host
        .output_devices()
        .map_err(|e| Error::Device(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok((inputs, outputs))
}

/// Probes input hardware through cpal
#[derive(Debug, Clone)]
pub struct CpalDeviceProbe {
    selector: String,
    sample_rate: u32,
}

impl CpalDeviceProbe {
    #[must_use]
    pub fn new(selector: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            selector: selector.into(),
            sample_rate,
        }
    }
}

impl DeviceProbe for CpalDeviceProbe {
    fn input_available(&self) -> bool {
        let host = cpal::default_host();

        let device = match find_input_device(&host, &self.selector) {
            Ok(device) => device,
            Err(e) => {
                tracing::error!(error = %e, "no audio input device found");
                return false;
            }
        };

        let configs = match device.supported_input_configs() {
            Ok(configs) => configs,
            Err(e) => {
                tracing::error!(error = %e, "error checking audio devices");
                return false;
            }
        };

        if let Some(config) = choose_config(configs, self.sample_rate) {
            tracing::info!(
                device = %device.name().unwrap_or_default(),
                format = %config.sample_format(),
                device_rate = config.sample_rate().0,
                "found input device"
            );
            true
        } else {
            tracing::error!("input device exposes no f32 or i16 capture configuration");
            false
        }
    }

    fn update_config(&mut self, config: &RuntimeConfig) {
        self.selector.clone_from(&config.input_device);
        self.sample_rate = config.sample_rate;
    }
}
