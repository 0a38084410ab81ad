//! Audio and codec parameters shared by both ends of a link
//!
//! Sender and receiver must agree on rate, channels, frame and bitrate:
//! together they fix the payload length carried by every datagram.

use std::time::Duration;

use crate::error::StartupError;
use crate::{
    DEFAULT_BITRATE_KBPS, DEFAULT_BUFFER_MS, DEFAULT_CHANNELS, DEFAULT_DEVICE, DEFAULT_FRAME,
    DEFAULT_RATE,
};

// =============================================================================
// Constants
// =============================================================================

/// Sample rates the codec accepts
pub const SUPPORTED_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Legal frame durations in units of 2.5ms (2.5, 5, 10, 20, 40, 60 ms)
const FRAME_QUANTA: [usize; 6] = [1, 2, 4, 8, 16, 24];

/// Lowest bitrate the codec accepts in kbps
pub const MIN_BITRATE_KBPS: u32 = 6;

/// Highest bitrate the codec accepts in kbps
pub const MAX_BITRATE_KBPS: u32 = 510;

/// Largest payload a single codec packet may have
pub const MAX_PAYLOAD_BYTES: usize = 1275;

// =============================================================================
// Audio Config
// =============================================================================

/// Device and codec parameters for one end of the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    /// Audio device name (`default` for the host default)
    pub device: String,
    /// Device buffer time in milliseconds
    pub buffer_ms: u32,
    /// Sample rate in Hz
    pub rate: u32,
    /// Number of interleaved channels (1 or 2)
    pub channels: u16,
    /// Samples per channel in one frame
    pub frame: usize,
    /// Codec bitrate in kbps
    pub bitrate_kbps: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            buffer_ms: DEFAULT_BUFFER_MS,
            rate: DEFAULT_RATE,
            channels: DEFAULT_CHANNELS,
            frame: DEFAULT_FRAME,
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
        }
    }
}

impl AudioConfig {
    /// Check that the codec can run with these parameters
    pub fn validate(&self) -> Result<(), StartupError> {
        if !SUPPORTED_RATES.contains(&self.rate) {
            return Err(StartupError::Config(format!(
                "unsupported sample rate {} (use one of {:?})",
                self.rate, SUPPORTED_RATES
            )));
        }

        if !(1..=2).contains(&self.channels) {
            return Err(StartupError::Config(format!(
                "unsupported channel count {} (use 1 or 2)",
                self.channels
            )));
        }

        if !self.is_legal_frame() {
            return Err(StartupError::Config(format!(
                "frame of {} samples is not 2.5, 5, 10, 20, 40 or 60 ms at {}Hz",
                self.frame, self.rate
            )));
        }

        if !(MIN_BITRATE_KBPS..=MAX_BITRATE_KBPS).contains(&self.bitrate_kbps) {
            return Err(StartupError::Config(format!(
                "bitrate {}kbps outside {}-{}kbps",
                self.bitrate_kbps, MIN_BITRATE_KBPS, MAX_BITRATE_KBPS
            )));
        }

        let payload = self.payload_len();
        if payload == 0 || payload > MAX_PAYLOAD_BYTES {
            return Err(StartupError::Config(format!(
                "payload of {} bytes per frame is out of range (1-{})",
                payload, MAX_PAYLOAD_BYTES
            )));
        }

        if self.buffer_ms == 0 {
            return Err(StartupError::Config("buffer time must be at least 1ms".into()));
        }

        Ok(())
    }

    fn is_legal_frame(&self) -> bool {
        let Some(scaled) = self.frame.checked_mul(400) else {
            return false;
        };
        let rate = self.rate as usize;
        scaled % rate == 0 && FRAME_QUANTA.contains(&(scaled / rate))
    }

    /// Fixed encoded payload length in bytes
    pub fn payload_len(&self) -> usize {
        (self.bitrate_kbps as usize * 1000 * self.frame) / self.rate as usize / 8
    }

    /// Interleaved samples in one frame
    pub fn samples_per_block(&self) -> usize {
        self.frame * self.channels as usize
    }

    /// Wall-clock length of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame as u64 * 1_000_000 / self.rate as u64)
    }

    /// Whole frames needed to cover `ms` milliseconds, at least one
    pub fn frames_for_ms(&self, ms: u32) -> usize {
        let samples = ms as usize * self.rate as usize;
        samples.div_ceil(1000 * self.frame).max(1)
    }
}
