//! trx Common Library
//!
//! Shared types, wire format, and real-time plumbing for the trx
//! point-to-point audio transceiver (`rx` and `tx`).

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod ingest;
pub mod jitter;
pub mod logging;
pub mod net;
pub mod sched;
pub mod sequencer;
pub mod wire;

pub use error::{
    CodecError, DeviceError, ProtocolError, SequencingError, StartupError, TrxError,
};

/// Default audio device name (the host's default device)
pub const DEFAULT_DEVICE: &str = "default";

/// Default audio device buffer time in milliseconds
pub const DEFAULT_BUFFER_MS: u32 = 16;

/// Default address the receiver listens on
pub const DEFAULT_ADDR: &str = "0.0.0.0";

/// Default UDP port for audio datagrams
pub const DEFAULT_PORT: u16 = 1350;

/// Default playout prebuffer in milliseconds
pub const DEFAULT_JITTER_MS: u32 = 16;

/// Default sample rate in Hz
pub const DEFAULT_RATE: u32 = 48000;

/// Default number of audio channels
pub const DEFAULT_CHANNELS: u16 = 2;

/// Default frame length in samples per channel (20ms at 48kHz)
pub const DEFAULT_FRAME: usize = 960;

/// Default codec bitrate in kbps
pub const DEFAULT_BITRATE_KBPS: u32 = 64;

/// Default fixed-priority scheduling level for the real-time loops
pub const DEFAULT_REALTIME_PRIORITY: i32 = sched::REALTIME_PRIORITY;
