//! Default-device audio output for the render engine

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SupportedStreamConfig, SupportedStreamConfigRange};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum AudioOutputError {
    #[error("No audio output device available")]
    NoDevice,
    #[error("Output device offers no f32 format")]
    NoFloatFormat,
    #[error("Failed to query output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("Failed to list output configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),
    #[error("Failed to build output stream: {0}")]
    Build(#[from] cpal::BuildStreamError),
    #[error("Failed to start output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
}

/// Default output device as reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl fmt::Display for OutputDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} Hz, {} ch)", self.name, self.sample_rate, self.channels)
    }
}

pub fn default_device_info() -> Result<OutputDeviceInfo, AudioOutputError> {
    let (device, config) = open_default_output()?;
    Ok(OutputDeviceInfo {
        name: device.name().unwrap_or_default(),
        sample_rate: config.sample_rate().0,
        channels: config.channels(),
    })
}

fn open_default_output() -> Result<(Device, SupportedStreamConfig), AudioOutputError> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or(AudioOutputError::NoDevice)?;
    let preferred = device.default_output_config()?;
    if preferred.sample_format() == SampleFormat::F32 {
        return Ok((device, preferred));
    }
    debug!(format = ?preferred.sample_format(), "Default output format is not f32, searching ranges");
    let config = choose_f32_config(&preferred, device.supported_output_configs()?)
        .ok_or(AudioOutputError::NoFloatFormat)?;
    Ok((device, config))
}

/// An f32 config matching the preferred channel count and sample rate
fn choose_f32_config(
    preferred: &SupportedStreamConfig,
    ranges: impl IntoIterator<Item = SupportedStreamConfigRange>,
) -> Option<SupportedStreamConfig> {
    let rate = preferred.sample_rate();
    ranges
        .into_iter()
        .filter(|r| r.sample_format() == SampleFormat::F32 && r.channels() == preferred.channels())
        .find(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
        .map(|r| r.with_sample_rate(rate))
}

/// Running output stream. The callback receives the interleaved device
/// buffer, the sample rate and the channel count.
pub struct RealtimeOutputStream {
    muted: Arc<AtomicBool>,
    sample_rate: u32,
    channels: u16,
    _stream: cpal::Stream,
}

impl RealtimeOutputStream {
    pub fn start<F>(mut render: F) -> Result<Self, AudioOutputError>
    where
        F: FnMut(&mut [f32], u32, u16) + Send + 'static,
    {
        let (device, config) = open_default_output()?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        let muted = Arc::new(AtomicBool::new(false));
        let callback_muted = muted.clone();

        let stream = device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if callback_muted.load(Ordering::Acquire) {
                    data.fill(0.0);
                } else {
                    render(data, sample_rate, channels);
                }
            },
            |err| error!("Output stream error: {}", err),
            None,
        )?;
        stream.play()?;

        info!(device = %device.name().unwrap_or_default(), sample_rate, channels, "Output stream running");
        Ok(Self { muted, sample_rate, channels, _stream: stream })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Stop calling the render callback; the device is fed silence until drop
    pub fn stop(&self) {
        self.muted.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }
}

impl Drop for RealtimeOutputStream {
    fn drop(&mut self) {
        self.stop();
    }
}
