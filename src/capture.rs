//! Audio capture binding
//!
//! Wraps a cpal input stream and feeds captured samples into the ring
//! buffer producer from the audio callback. Interleaved channels are
//! downmixed to mono in a preallocated scratch buffer; the callback never
//! blocks. Device loss is terminal for the pipeline: it is surfaced to
//! the caller (via [`CaptureStream::is_healthy`]) and never retried here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use thiserror::Error;
use tracing::{error, info};

use crate::ring_buffer::Producer;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no audio input device available")]
    NoDevice,
    #[error("failed to enumerate audio devices: {0}")]
    Devices(#[from] cpal::DevicesError),
    #[error("failed to read device name: {0}")]
    DeviceName(#[from] cpal::DeviceNameError),
    #[error("failed to query device config: {0}")]
    DeviceConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start input stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("unsupported sample format: {0:?}")]
    UnsupportedFormat(cpal::SampleFormat),
}

/// Names of every available input device on the default host.
pub fn list_input_devices() -> Result<Vec<String>, CaptureError> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    for device in host.input_devices()? {
        names.push(device.name()?);
    }
    Ok(names)
}

/// A selected input device with its negotiated stream configuration,
/// ready to start. Splitting selection from starting lets the caller size
/// the pipeline from the sample rate before any audio flows.
pub struct CaptureDevice {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
}

impl CaptureDevice {
    /// Open the named input device, or the host default when `name` is
    /// `None`.
    pub fn open(name: Option<&str>) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = match name {
            Some(wanted) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or(CaptureError::NoDevice)?,
            None => host.default_input_device().ok_or(CaptureError::NoDevice)?,
        };
        let config = device.default_input_config()?;
        info!(
            device = %device.name().unwrap_or_else(|_| "<unknown>".into()),
            rate = config.sample_rate().0,
            channels = config.channels(),
            format = ?config.sample_format(),
            "capture device selected"
        );
        Ok(Self { device, config })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    pub fn name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "<unknown>".into())
    }

    /// Start capturing into `producer`. The returned stream keeps the
    /// capture alive; dropping it stops the device.
    pub fn start(self, producer: Producer) -> Result<CaptureStream, CaptureError> {
        let sample_rate = self.sample_rate();
        let channels = self.config.channels() as usize;
        let failed = Arc::new(AtomicBool::new(false));

        let stream = match self.config.sample_format() {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&self.device, &self.config.into(), producer, channels, &failed)
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&self.device, &self.config.into(), producer, channels, &failed)
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&self.device, &self.config.into(), producer, channels, &failed)
            }
            other => return Err(CaptureError::UnsupportedFormat(other)),
        }?;

        stream.play()?;
        info!(rate = sample_rate, "capture stream started");

        Ok(CaptureStream {
            sample_rate,
            failed,
            _stream: stream,
        })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: Producer,
    channels: usize,
    failed: &Arc<AtomicBool>,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let failed = Arc::clone(failed);
    let mut mono = Vec::with_capacity(8192);
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            mono.clear();
            for frame in data.chunks_exact(channels) {
                let mut sum = 0.0f32;
                for &s in frame {
                    let sample: f32 = cpal::Sample::from_sample(s);
                    sum += sample;
                }
                mono.push(sum / channels as f32);
            }
            producer.write(&mono);
        },
        {
            let failed = Arc::clone(&failed);
            move |err| {
                error!("capture stream error: {err}");
                failed.store(true, Ordering::Release);
            }
        },
        None,
    )?;
    Ok(stream)
}

/// A running capture stream. Owns the cpal stream; audio stops when this
/// is dropped.
pub struct CaptureStream {
    sample_rate: u32,
    failed: Arc<AtomicBool>,
    _stream: cpal::Stream,
}

impl CaptureStream {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// False once the device has reported a stream error (unplugged,
    /// backend failure). The pipeline owner decides whether to restart or
    /// shut down.
    pub fn is_healthy(&self) -> bool {
        !self.failed.load(Ordering::Acquire)
    }
}
