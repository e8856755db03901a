// Process-wide audio output. One device, one current source.
// The cpal stream is not Send, so it lives on its own thread and we keep the mixer.

use super::decoder::StreamFormat;
use super::error::DeviceError;
use parking_lot::Mutex;
use rodio::cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rodio::dynamic_mixer::{self, DynamicMixer, DynamicMixerController};
use rodio::{cpal, Sink, Source};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

pub type OutputSource = Box<dyn Source<Item = f32> + Send>;

/// The output device as the playback controller sees it.
pub trait AudioOutput: Send {
    /// Open the device for `format`, or keep the open one if it already matches.
    fn init(&mut self, format: StreamFormat, latency: Duration) -> Result<(), DeviceError>;

    /// Replace whatever is playing with `source`.
    fn play(&mut self, source: OutputSource) -> Result<(), DeviceError>;

    /// Drop the current source, if any. The device stays open.
    fn clear(&mut self);
}

/// Every access to the device goes through this lock.
pub type SharedOutput = Arc<Mutex<Box<dyn AudioOutput>>>;

pub fn shared(output: impl AudioOutput + 'static) -> SharedOutput {
    Arc::new(Mutex::new(Box::new(output)))
}

/// Default system output. A cpal stream at the requested buffer size feeds a rodio
/// mixer; each `play` hangs a fresh rodio `Sink` off that mixer.
#[derive(Default)]
pub struct RodioOutput {
    device: Option<OpenDevice>,
    sink: Option<Sink>,
}

impl RodioOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioOutput for RodioOutput {
    fn init(&mut self, format: StreamFormat, latency: Duration) -> Result<(), DeviceError> {
        if let Some(device) = &self.device {
            if device.requested_rate == format.sample_rate && device.requested_latency == latency {
                debug!(%format, "reusing open output device");
                return Ok(());
            }
            info!(from = device.requested_rate, to = format.sample_rate, "output format changed, reopening device");
        }

        self.clear();
        self.device = None;

        info!(%format, latency_ms = latency.as_millis() as u64, "opening output device");
        self.device = Some(OpenDevice::open(format, latency)?);
        Ok(())
    }

    fn play(&mut self, source: OutputSource) -> Result<(), DeviceError> {
        let device = self.device.as_ref().ok_or(DeviceError::NotInitialized)?;
        let (sink, queue) = Sink::new_idle();
        device.mixer.add(queue);
        sink.append(source);
        sink.play();

        if let Some(previous) = self.sink.replace(sink) {
            previous.stop();
        }
        Ok(())
    }

    fn clear(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
            debug!("output source cleared");
        }
    }
}

struct OpenDevice {
    mixer: Arc<DynamicMixerController<f32>>,
    requested_rate: u32,
    requested_latency: Duration,
    shutdown: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl OpenDevice {
    fn open(format: StreamFormat, latency: Duration) -> Result<Self, DeviceError> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match open_stream(format, latency) {
                Ok((stream, mixer)) => {
                    if ready_tx.send(Ok(mixer)).is_err() {
                        return;
                    }
                    // keep the stream alive until shutdown or until the sender is dropped
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    debug!("output stream closed");
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        let mixer = ready_rx
            .recv_timeout(DEVICE_OPEN_TIMEOUT)
            .map_err(|_| DeviceError::Stream("output thread did not report back".to_string()))??;

        Ok(Self {
            mixer,
            requested_rate: format.sample_rate,
            requested_latency: latency,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

impl Drop for OpenDevice {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

type OpenedStream = (cpal::Stream, Arc<DynamicMixerController<f32>>);

fn open_stream(format: StreamFormat, latency: Duration) -> Result<OpenedStream, DeviceError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(DeviceError::NoDevice)?;

    let supported = match matching_config(&device, format) {
        Some(config) => config,
        None => {
            warn!(%format, "no device config at the stream rate, using the device default");
            device
                .default_output_config()
                .map_err(|e| DeviceError::Stream(e.to_string()))?
        }
    };

    let mut config = supported.config();
    let frames = latency_frames(config.sample_rate.0, latency);
    config.buffer_size = buffer_size_for(supported.buffer_size(), frames);
    debug!(
        rate = config.sample_rate.0,
        channels = config.channels,
        sample_format = ?supported.sample_format(),
        buffer = ?config.buffer_size,
        "output stream config"
    );

    match start_stream(&device, &config, supported.sample_format()) {
        Ok(opened) => Ok(opened),
        Err(err) if config.buffer_size != cpal::BufferSize::Default => {
            warn!(%err, frames, "device refused the latency target, using its default buffer");
            config.buffer_size = cpal::BufferSize::Default;
            start_stream(&device, &config, supported.sample_format())
        }
        Err(err) => Err(err),
    }
}

/// Frames per device buffer for a latency target at `sample_rate`.
pub(crate) fn latency_frames(sample_rate: u32, latency: Duration) -> u32 {
    let frames = u128::from(sample_rate) * latency.as_millis() / 1000;
    frames.clamp(1, u128::from(u32::MAX)) as u32
}

/// Fit the requested frame count into what the device reports it can do.
pub(crate) fn buffer_size_for(supported: &cpal::SupportedBufferSize, frames: u32) -> cpal::BufferSize {
    match supported {
        cpal::SupportedBufferSize::Range { min, max } => cpal::BufferSize::Fixed(frames.max(*min).min(*max)),
        cpal::SupportedBufferSize::Unknown => cpal::BufferSize::Fixed(frames),
    }
}

fn start_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
) -> Result<OpenedStream, DeviceError> {
    let (controller, mixer) = dynamic_mixer::mixer::<f32>(config.channels, config.sample_rate.0);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, mixer),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, mixer),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, mixer),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, mixer),
        other => return Err(DeviceError::UnsupportedFormat(format!("{:?}", other))),
    }
    .map_err(|e| DeviceError::Stream(e.to_string()))?;

    stream.play().map_err(|e| DeviceError::Stream(e.to_string()))?;
    Ok((stream, controller))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: DynamicMixer<f32>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for out in data.iter_mut() {
                *out = T::from_sample(mixer.next().unwrap_or(0.0));
            }
        },
        |err| warn!(%err, "output stream error"),
        None,
    )
}

/// A device config at the stream's rate, preferring its channel count, then f32 samples.
fn matching_config(device: &cpal::Device, format: StreamFormat) -> Option<cpal::SupportedStreamConfig> {
    let rate = cpal::SampleRate(format.sample_rate);
    let mut ranges: Vec<_> = device
        .supported_output_configs()
        .ok()?
        .filter(|range| range.min_sample_rate() <= rate && rate <= range.max_sample_rate())
        .collect();

    ranges.sort_by_key(|range| {
        (
            range.channels() != format.channels,
            range.sample_format() != cpal::SampleFormat::F32,
        )
    });
    ranges.into_iter().next().map(|range| range.with_sample_rate(rate))
}
