//! Audio sink and source devices
//!
//! The real-time loops are paced by the audio device clock: a sink write
//! blocks until the device has room, a source read blocks until the device
//! has produced a block. The cpal implementations get that behavior from a
//! bounded channel between the loop and the device callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, TrySendError,
};
use tracing::{debug, warn};

use crate::DEFAULT_DEVICE;
use crate::config::AudioConfig;
use crate::error::{DeviceError, StartupError};

// =============================================================================
// Traits
// =============================================================================

/// Playback device
pub trait AudioSink {
    /// Queue one block of interleaved samples for playback
    ///
    /// Blocks until the device has room.
    ///
    /// # Returns
    /// * `Ok(frames)` - Frames accepted; fewer than the block is a short write
    /// * `Err(DeviceError)` - Device failure
    fn write(&mut self, pcm: &[f32]) -> Result<usize, DeviceError>;

    /// Attempt to bring the device back after a recoverable error
    fn recover(&mut self) -> Result<(), DeviceError>;
}

/// Capture device
pub trait AudioSource {
    /// Fill `pcm` with one block of interleaved samples
    ///
    /// Blocks until the device has produced the block.
    ///
    /// # Returns
    /// * `Ok(frames)` - Frames read; fewer than the block is a short read
    /// * `Err(DeviceError)` - Device failure
    fn read(&mut self, pcm: &mut [f32]) -> Result<usize, DeviceError>;

    /// Attempt to bring the device back after a recoverable error
    fn recover(&mut self) -> Result<(), DeviceError>;
}

// =============================================================================
// Device Lookup
// =============================================================================

/// Find an output device by name (`default` is the host default)
fn find_output_device(name: &str) -> Option<Device> {
    let host = cpal::default_host();

    if name.is_empty() || name == DEFAULT_DEVICE {
        return host.default_output_device();
    }

    host.output_devices()
        .ok()?
        .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
}

/// Find an input device by name (`default` is the host default)
fn find_input_device(name: &str) -> Option<Device> {
    let host = cpal::default_host();

    if name.is_empty() || name == DEFAULT_DEVICE {
        return host.default_input_device();
    }

    host.input_devices()
        .ok()?
        .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
}

/// Sample formats the stream builders handle, in order of preference
const SUPPORTED_FORMATS: [SampleFormat; 3] = [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16];

/// Pick the best sample format the device offers for `config`
fn pick_format<I>(configs: I, config: &AudioConfig) -> Option<SampleFormat>
where
    I: Iterator<Item = cpal::SupportedStreamConfigRange>,
{
    let usable: Vec<SampleFormat> = configs
        .filter(|c| {
            c.channels() == config.channels
                && c.min_sample_rate() <= config.rate
                && c.max_sample_rate() >= config.rate
        })
        .map(|c| c.sample_format())
        .collect();

    SUPPORTED_FORMATS
        .into_iter()
        .find(|format| usable.contains(format))
}

/// Blocks of buffering between the loop and the device callback
fn queue_depth(config: &AudioConfig) -> usize {
    config.frames_for_ms(config.buffer_ms)
}

/// Shared flags the device callbacks raise for the loop to observe
#[derive(Default)]
struct StreamFlags {
    /// Sink ran dry or source had nowhere to put a block
    xrun: AtomicBool,
    /// Backend reported an error
    failed: AtomicBool,
}

// =============================================================================
// cpal Sink
// =============================================================================

/// Playback through a cpal output stream
pub struct CpalSink {
    /// Keeps the stream alive
    _stream: Stream,
    /// Blocks waiting for the device callback
    blocks: Sender<Vec<f32>>,
    /// Callback status
    flags: Arc<StreamFlags>,
    /// Stream error text, reported once
    errors: Receiver<String>,
    /// How long a write may wait for room before it counts as short
    timeout: Duration,
    /// Interleaved channel count
    channels: usize,
}

impl CpalSink {
    /// Open and start the named output device
    pub fn open(config: &AudioConfig) -> Result<Self, StartupError> {
        let device_err = |message: String| StartupError::Device {
            device: config.device.clone(),
            message,
        };

        let device = find_output_device(&config.device)
            .ok_or_else(|| device_err("output device not found".into()))?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| device_err(format!("failed to get supported configs: {}", e)))?;
        let format = pick_format(supported, config).ok_or_else(|| {
            device_err(format!(
                "no {}Hz {}-channel output format",
                config.rate, config.channels
            ))
        })?;

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: config.rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let depth = queue_depth(config);
        let (blocks_tx, blocks_rx) = crossbeam_channel::bounded(depth);
        let (error_tx, error_rx) = crossbeam_channel::unbounded();
        let flags = Arc::new(StreamFlags::default());

        let stream = match format {
            SampleFormat::F32 => {
                build_output::<f32>(&device, &stream_config, blocks_rx, flags.clone(), error_tx)
            }
            SampleFormat::I16 => {
                build_output::<i16>(&device, &stream_config, blocks_rx, flags.clone(), error_tx)
            }
            _ => build_output::<u16>(&device, &stream_config, blocks_rx, flags.clone(), error_tx),
        }
        .map_err(|e| device_err(format!("failed to build output stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| device_err(format!("failed to start output stream: {}", e)))?;

        debug!(device = %config.device, ?format, depth, "output stream started");

        Ok(Self {
            _stream: stream,
            blocks: blocks_tx,
            flags,
            errors: error_rx,
            timeout: config.frame_duration() * (depth as u32 + 1),
            channels: config.channels as usize,
        })
    }

    fn check_stream(&self) -> Result<(), DeviceError> {
        match self.errors.try_recv() {
            Ok(message) => Err(DeviceError::Stream(message)),
            Err(TryRecvError::Empty) if self.flags.failed.load(Ordering::Acquire) => {
                Err(DeviceError::Closed)
            }
            Err(TryRecvError::Empty) => Ok(()),
            Err(TryRecvError::Disconnected) => Err(DeviceError::Closed),
        }
    }
}

impl AudioSink for CpalSink {
    fn write(&mut self, pcm: &[f32]) -> Result<usize, DeviceError> {
        self.check_stream()?;

        if self.flags.xrun.swap(false, Ordering::AcqRel) {
            return Err(DeviceError::Underrun);
        }

        match self.blocks.send_timeout(pcm.to_vec(), self.timeout) {
            Ok(()) => Ok(pcm.len() / self.channels),
            Err(SendTimeoutError::Timeout(_)) => Ok(0),
            Err(SendTimeoutError::Disconnected(_)) => Err(DeviceError::Closed),
        }
    }

    fn recover(&mut self) -> Result<(), DeviceError> {
        self.check_stream()?;
        self.flags.xrun.store(false, Ordering::Release);
        Ok(())
    }
}

fn build_output<T>(
    device: &Device,
    config: &StreamConfig,
    blocks: Receiver<Vec<f32>>,
    flags: Arc<StreamFlags>,
    error_tx: Sender<String>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: Sample + cpal::SizedSample + FromSample<f32>,
{
    let callback_flags = flags.clone();
    let mut pending: Vec<f32> = Vec::new();
    let mut offset = 0;
    let mut primed = false;

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let mut filled = 0;

            while filled < data.len() {
                if offset == pending.len() {
                    match blocks.try_recv() {
                        Ok(block) => {
                            pending = block;
                            offset = 0;
                            primed = true;
                        }
                        Err(_) => break,
                    }
                }

                let n = (pending.len() - offset).min(data.len() - filled);
                for (dst, src) in data[filled..filled + n]
                    .iter_mut()
                    .zip(&pending[offset..offset + n])
                {
                    *dst = T::from_sample(*src);
                }
                filled += n;
                offset += n;
            }

            if filled < data.len() {
                for dst in &mut data[filled..] {
                    *dst = T::from_sample(0.0f32);
                }
                // Silence before the first block is not an underrun
                if primed {
                    callback_flags.xrun.store(true, Ordering::Release);
                }
            }
        },
        move |err| {
            flags.failed.store(true, Ordering::Release);
            let _ = error_tx.send(err.to_string());
        },
        None,
    )
}

// =============================================================================
// cpal Source
// =============================================================================

/// Capture through a cpal input stream
pub struct CpalSource {
    /// Keeps the stream alive
    _stream: Stream,
    /// Complete blocks from the device callback
    blocks: Receiver<Vec<f32>>,
    /// Callback status
    flags: Arc<StreamFlags>,
    /// Stream error text, reported once
    errors: Receiver<String>,
    /// How long a read may wait before the device counts as stalled
    timeout: Duration,
    /// Interleaved channel count
    channels: usize,
}

impl CpalSource {
    /// Open and start the named input device
    pub fn open(config: &AudioConfig) -> Result<Self, StartupError> {
        let device_err = |message: String| StartupError::Device {
            device: config.device.clone(),
            message,
        };

        let device = find_input_device(&config.device)
            .ok_or_else(|| device_err("input device not found".into()))?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| device_err(format!("failed to get supported configs: {}", e)))?;
        let format = pick_format(supported, config).ok_or_else(|| {
            device_err(format!(
                "no {}Hz {}-channel input format",
                config.rate, config.channels
            ))
        })?;

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: config.rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let depth = queue_depth(config);
        let block = config.samples_per_block();
        let (blocks_tx, blocks_rx) = crossbeam_channel::bounded(depth);
        let (error_tx, error_rx) = crossbeam_channel::unbounded();
        let flags = Arc::new(StreamFlags::default());

        let stream = match format {
            SampleFormat::F32 => build_input::<f32>(
                &device,
                &stream_config,
                block,
                blocks_tx,
                flags.clone(),
                error_tx,
            ),
            SampleFormat::I16 => build_input::<i16>(
                &device,
                &stream_config,
                block,
                blocks_tx,
                flags.clone(),
                error_tx,
            ),
            _ => build_input::<u16>(
                &device,
                &stream_config,
                block,
                blocks_tx,
                flags.clone(),
                error_tx,
            ),
        }
        .map_err(|e| device_err(format!("failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| device_err(format!("failed to start input stream: {}", e)))?;

        debug!(device = %config.device, ?format, depth, "input stream started");

        Ok(Self {
            _stream: stream,
            blocks: blocks_rx,
            flags,
            errors: error_rx,
            timeout: config.frame_duration() * (depth as u32 + 1),
            channels: config.channels as usize,
        })
    }
}

impl AudioSource for CpalSource {
    fn read(&mut self, pcm: &mut [f32]) -> Result<usize, DeviceError> {
        if let Ok(message) = self.errors.try_recv() {
            return Err(DeviceError::Stream(message));
        }
        if self.flags.xrun.swap(false, Ordering::AcqRel) {
            return Err(DeviceError::Overrun);
        }

        match self.blocks.recv_timeout(self.timeout) {
            Ok(block) => {
                let n = block.len().min(pcm.len());
                pcm[..n].copy_from_slice(&block[..n]);
                Ok(n / self.channels)
            }
            Err(RecvTimeoutError::Timeout) => Err(DeviceError::Stalled),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::Closed),
        }
    }

    fn recover(&mut self) -> Result<(), DeviceError> {
        if self.flags.failed.load(Ordering::Acquire) {
            return Err(DeviceError::Closed);
        }

        // Stale blocks would put capture further behind real time
        let stale = self.blocks.try_iter().count();
        if stale > 0 {
            warn!(blocks = stale, "discarded stale capture");
        }
        self.flags.xrun.store(false, Ordering::Release);
        Ok(())
    }
}

fn build_input<T>(
    device: &Device,
    config: &StreamConfig,
    block: usize,
    blocks: Sender<Vec<f32>>,
    flags: Arc<StreamFlags>,
    error_tx: Sender<String>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: Sample + cpal::SizedSample,
    f32: FromSample<T>,
{
    let callback_flags = flags.clone();
    let mut pending: Vec<f32> = Vec::with_capacity(block);

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for sample in data {
                pending.push(f32::from_sample(*sample));

                if pending.len() == block {
                    let full = std::mem::replace(&mut pending, Vec::with_capacity(block));
                    match blocks.try_send(full) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            callback_flags.xrun.store(true, Ordering::Release)
                        }
                        Err(TrySendError::Disconnected(_)) => return,
                    }
                }
            }
        },
        move |err| {
            flags.failed.store(true, Ordering::Release);
            let _ = error_tx.send(err.to_string());
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_depth_from_buffer_time() {
        let config = AudioConfig::default();
        assert_eq!(queue_depth(&config), 1);

        let config = AudioConfig {
            buffer_ms: 100,
            ..Default::default()
        };
        assert_eq!(queue_depth(&config), 5);
    }

    #[test]
    fn test_missing_device_is_startup_error() {
        let config = AudioConfig {
            device: "no-such-device-for-trx-tests".into(),
            ..Default::default()
        };
        assert!(matches!(
            CpalSink::open(&config),
            Err(StartupError::Device { .. })
        ));
        assert!(matches!(
            CpalSource::open(&config),
            Err(StartupError::Device { .. })
        ));
    }
}
