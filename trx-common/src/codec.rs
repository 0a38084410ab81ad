//! Opus codec behind fixed-size frame traits
//!
//! Every datagram carries a payload of exactly the same length, so the
//! encoder runs at constant bitrate and pads its output to that length.
//! The decoder synthesizes concealment audio when a frame is missing.

use opus::{Application, Bitrate, Channels, Decoder, Encoder};

use crate::config::AudioConfig;
use crate::error::CodecError;

// =============================================================================
// Traits
// =============================================================================

/// Encodes one block of interleaved samples into a fixed-size payload
pub trait FrameEncoder {
    /// Encode `pcm` into exactly `out.len()` bytes
    fn encode(&mut self, pcm: &[f32], out: &mut [u8]) -> Result<(), CodecError>;
}

/// Decodes one payload, or conceals a missing one, into a block of samples
pub trait FrameDecoder {
    /// Fill `pcm` from `payload`, or with concealment output when `None`
    fn decode(&mut self, payload: Option<&[u8]>, pcm: &mut [f32]) -> Result<(), CodecError>;
}

fn opus_channels(channels: u16) -> Result<Channels, CodecError> {
    match channels {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        n => Err(CodecError::Create(format!("unsupported channel count {}", n))),
    }
}

// =============================================================================
// Opus Encoder
// =============================================================================

/// Constant-bitrate Opus encoder
pub struct OpusEncoder {
    /// The Opus encoder instance
    encoder: Encoder,
    /// Interleaved samples expected per call
    block: usize,
}

impl OpusEncoder {
    /// Create an encoder for the given audio parameters
    ///
    /// # Returns
    /// * `Ok(OpusEncoder)` - Encoder ready for use
    /// * `Err(CodecError::Create)` - Parameters rejected by the codec
    pub fn new(config: &AudioConfig) -> Result<Self, CodecError> {
        let channels = opus_channels(config.channels)?;

        let mut encoder = Encoder::new(config.rate, channels, Application::Audio)
            .map_err(|e| CodecError::Create(e.to_string()))?;

        encoder
            .set_bitrate(Bitrate::Bits(config.bitrate_kbps as i32 * 1000))
            .map_err(|e| CodecError::Create(format!("bitrate: {}", e)))?;

        // Fixed payload length needs constant bitrate
        encoder
            .set_vbr(false)
            .map_err(|e| CodecError::Create(format!("vbr: {}", e)))?;

        Ok(Self {
            encoder,
            block: config.samples_per_block(),
        })
    }
}

impl FrameEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[f32], out: &mut [u8]) -> Result<(), CodecError> {
        if pcm.len() != self.block {
            return Err(CodecError::Encode(format!(
                "expected {} samples, got {}",
                self.block,
                pcm.len()
            )));
        }

        let len = self
            .encoder
            .encode_float(pcm, out)
            .map_err(|e| CodecError::Encode(e.to_string()))?;

        if len < out.len() {
            opus::packet::pad(out, len).map_err(|e| CodecError::Encode(format!("pad: {}", e)))?;
        }

        Ok(())
    }
}

// =============================================================================
// Opus Decoder
// =============================================================================

/// Opus decoder with packet loss concealment
pub struct OpusDecoder {
    /// The Opus decoder instance
    decoder: Decoder,
    /// Samples per channel in one frame
    frame: usize,
    /// Interleaved channel count
    channels: usize,
}

impl OpusDecoder {
    /// Create a decoder for the given audio parameters
    pub fn new(config: &AudioConfig) -> Result<Self, CodecError> {
        let decoder = Decoder::new(config.rate, opus_channels(config.channels)?)
            .map_err(|e| CodecError::Create(e.to_string()))?;

        Ok(Self {
            decoder,
            frame: config.frame,
            channels: config.channels as usize,
        })
    }
}

impl FrameDecoder for OpusDecoder {
    fn decode(&mut self, payload: Option<&[u8]>, pcm: &mut [f32]) -> Result<(), CodecError> {
        let block = self.frame * self.channels;
        if pcm.len() != block {
            return Err(CodecError::Decode(format!(
                "expected room for {} samples, got {}",
                block,
                pcm.len()
            )));
        }

        // An empty packet asks the decoder for concealment
        let decoded = self
            .decoder
            .decode_float(payload.unwrap_or(&[]), pcm, false)
            .map_err(|e| CodecError::Decode(e.to_string()))?;

        if decoded != self.frame {
            return Err(CodecError::Decode(format!(
                "decoded {} samples per channel, expected {}",
                decoded, self.frame
            )));
        }

        Ok(())
    }
}
