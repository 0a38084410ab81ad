//! Error taxonomy shared by the receive and transmit paths
//!
//! Per-packet errors (`ProtocolError`, `SequencingError`) are absorbed at the
//! ingest boundary and never reach the real-time loops. Everything else ends
//! up in `TrxError`, which aborts the owning loop.

use std::io;

use thiserror::Error;

/// Malformed datagram. Discarded, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Datagram length differs from sequence header + fixed payload
    #[error("datagram is {actual} bytes, expected {expected}")]
    WrongLength {
        /// Exact length a valid datagram must have
        expected: usize,
        /// Length that was received
        actual: usize,
    },
}

/// Frame rejected by the jitter buffer. Never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SequencingError {
    /// Sequence number is older than the window base
    #[error("late frame (seq {0})")]
    Late(u32),

    /// Sequence number is beyond the end of the window
    #[error("early frame (seq {0})")]
    Early(u32),

    /// A frame with this sequence number is already held
    #[error("duplicate frame (seq {0})")]
    Duplicate(u32),
}

/// I/O failure on the audio sink or source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Playback ran out of data
    #[error("buffer underrun")]
    Underrun,

    /// Capture produced more data than was consumed
    #[error("buffer overrun")]
    Overrun,

    /// Device stopped consuming or producing within its buffer time
    #[error("device stalled")]
    Stalled,

    /// Backend stream error
    #[error("stream error: {0}")]
    Stream(String),

    /// Device has been closed
    #[error("device closed")]
    Closed,
}

impl DeviceError {
    /// Whether a single `recover` call can bring the device back
    pub fn recoverable(&self) -> bool {
        matches!(self, Self::Underrun | Self::Overrun | Self::Stalled)
    }
}

/// Codec failure. Fatal for the stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Codec could not be created with the requested parameters
    #[error("failed to create codec: {0}")]
    Create(String),

    /// Encoding a block failed
    #[error("encode failed: {0}")]
    Encode(String),

    /// Decoding (or concealing) a frame failed
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Failure before any real-time loop starts
#[derive(Debug, Error)]
pub enum StartupError {
    /// Invalid combination of configuration values
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Requested priority exceeds what the scheduler allows
    #[error("invalid realtime priority {priority} (maximum {max})")]
    InvalidPriority {
        /// Priority that was requested
        priority: i32,
        /// Highest priority the scheduling class accepts
        max: i32,
    },

    /// Scheduler refused the fixed-priority class
    #[error("failed to enter realtime scheduling: {0}")]
    Realtime(#[source] io::Error),

    /// Audio device could not be opened or configured
    #[error("audio device '{device}': {message}")]
    Device {
        /// Device name as configured
        device: String,
        /// What went wrong
        message: String,
    },

    /// Network endpoint could not be bound or connected
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Endpoint description
        addr: String,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// Remote host name did not resolve to a usable address
    #[error("failed to resolve {0}")]
    Resolve(String),

    /// Codec could not be created
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Push-to-talk input could not be opened
    #[error("push-to-talk input '{device}': {source}")]
    Ptt {
        /// Input device path
        device: String,
        /// Underlying open error
        #[source]
        source: io::Error,
    },
}

/// Fatal error that ends a real-time loop
#[derive(Debug, Error)]
pub enum TrxError {
    /// Audio sink/source failed and could not be recovered
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Codec state is unusable
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Socket error other than would-block
    #[error("network error: {0}")]
    Network(#[from] io::Error),

    /// Failure during setup
    #[error(transparent)]
    Startup(#[from] StartupError),
}

impl TrxError {
    /// Name of the failing subsystem, used in the exit message
    pub fn subsystem(&self) -> &'static str {
        match self {
            Self::Device(_) => "audio device",
            Self::Codec(_) => "codec",
            Self::Network(_) => "network",
            Self::Startup(StartupError::Realtime(_) | StartupError::InvalidPriority { .. }) => {
                "scheduler"
            }
            Self::Startup(StartupError::Device { .. }) => "audio device",
            Self::Startup(StartupError::Bind { .. } | StartupError::Resolve(_)) => "network",
            Self::Startup(StartupError::Codec(_)) => "codec",
            Self::Startup(StartupError::Ptt { .. }) => "push-to-talk",
            Self::Startup(StartupError::Config(_)) => "configuration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_recoverable() {
        assert!(DeviceError::Underrun.recoverable());
        assert!(DeviceError::Overrun.recoverable());
        assert!(DeviceError::Stalled.recoverable());
        assert!(!DeviceError::Stream("gone".into()).recoverable());
        assert!(!DeviceError::Closed.recoverable());
    }

    #[test]
    fn test_subsystem_names() {
        assert_eq!(TrxError::from(DeviceError::Closed).subsystem(), "audio device");
        assert_eq!(
            TrxError::from(CodecError::Decode("bad".into())).subsystem(),
            "codec"
        );
        assert_eq!(
            TrxError::from(StartupError::InvalidPriority {
                priority: 120,
                max: 99
            })
            .subsystem(),
            "scheduler"
        );
        assert_eq!(
            TrxError::from(io::Error::other("boom")).subsystem(),
            "network"
        );
    }

    #[test]
    fn test_protocol_error_message() {
        let err = ProtocolError::WrongLength {
            expected: 164,
            actual: 12,
        };
        assert_eq!(err.to_string(), "datagram is 12 bytes, expected 164");
    }
}
