//! Command-line argument parsing

use std::net::{IpAddr, SocketAddr};

use clap::{ArgAction, Parser};
use trx_common::config::AudioConfig;
use trx_common::jitter::JITTER_WINDOW;
use trx_common::{
    DEFAULT_ADDR, DEFAULT_BITRATE_KBPS, DEFAULT_BUFFER_MS, DEFAULT_CHANNELS, DEFAULT_DEVICE,
    DEFAULT_FRAME, DEFAULT_JITTER_MS, DEFAULT_PORT, DEFAULT_RATE, DEFAULT_REALTIME_PRIORITY,
    StartupError,
};

use crate::playout::PlayoutConfig;

/// Receive audio over UDP and play it
///
/// `-h` is the listen address, so help is only available as `--help`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, disable_help_flag = true)]
pub struct Args {
    /// Audio output device name
    #[arg(short = 'd', long, default_value = DEFAULT_DEVICE)]
    pub device: String,

    /// Audio device buffer time (milliseconds)
    #[arg(short = 'm', long = "buffer", default_value_t = DEFAULT_BUFFER_MS)]
    pub buffer_ms: u32,

    /// Address to listen on (IPv4 or IPv6)
    #[arg(short = 'h', long = "addr", default_value = DEFAULT_ADDR)]
    pub addr: IpAddr,

    /// UDP port to listen on
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Playout prebuffer (milliseconds)
    #[arg(short = 'j', long = "jitter", default_value_t = DEFAULT_JITTER_MS)]
    pub jitter_ms: u32,

    /// Sample rate (Hz)
    #[arg(short = 'r', long, default_value_t = DEFAULT_RATE)]
    pub rate: u32,

    /// Number of channels
    #[arg(short = 'c', long, default_value_t = DEFAULT_CHANNELS)]
    pub channels: u16,

    /// Frame size (samples per channel)
    #[arg(short = 'f', long, default_value_t = DEFAULT_FRAME)]
    pub frame: usize,

    /// Codec bitrate (kbps), must match the sender
    #[arg(short = 'b', long, default_value_t = DEFAULT_BITRATE_KBPS)]
    pub bitrate: u32,

    /// Jitter buffer window (frames)
    #[arg(long = "jitter-window", default_value_t = JITTER_WINDOW)]
    pub jitter_window: usize,

    /// Realtime scheduling priority
    #[arg(long, default_value_t = DEFAULT_REALTIME_PRIORITY)]
    pub priority: i32,

    /// Increase verbosity (repeat for more)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    pub help: Option<bool>,
}

// =============================================================================
// Receiver Config
// =============================================================================

/// Validated receiver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxConfig {
    /// Device and codec parameters
    pub audio: AudioConfig,
    /// Socket address to receive on
    pub listen: SocketAddr,
    /// Prebuffer before playout starts (milliseconds)
    pub jitter_ms: u32,
    /// Jitter buffer capacity (frames)
    pub window: usize,
    /// Realtime scheduling priority for the playout thread
    pub priority: i32,
}

impl RxConfig {
    /// Frames to hold before playout starts
    pub fn prebuffer(&self) -> usize {
        self.audio.frames_for_ms(self.jitter_ms)
    }

    /// Parameters for the playout driver
    pub fn playout(&self) -> PlayoutConfig {
        PlayoutConfig {
            payload_len: self.audio.payload_len(),
            frame: self.audio.frame,
            channels: self.audio.channels as usize,
            window: self.window,
            prebuffer: self.prebuffer(),
        }
    }
}

impl TryFrom<Args> for RxConfig {
    type Error = StartupError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let config = Self {
            audio: AudioConfig {
                device: args.device,
                buffer_ms: args.buffer_ms,
                rate: args.rate,
                channels: args.channels,
                frame: args.frame,
                bitrate_kbps: args.bitrate,
            },
            listen: SocketAddr::new(args.addr, args.port),
            jitter_ms: args.jitter_ms,
            window: args.jitter_window,
            priority: args.priority,
        };

        config.audio.validate()?;

        if config.window == 0 || config.window > i32::MAX as usize {
            return Err(StartupError::Config(format!(
                "jitter window of {} frames is out of range",
                config.window
            )));
        }

        let prebuffer = config.prebuffer();
        if prebuffer > config.window {
            return Err(StartupError::Config(format!(
                "jitter of {}ms needs {} frames but the window holds {}",
                config.jitter_ms, prebuffer, config.window
            )));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("rx").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = RxConfig::try_from(parse(&[])).unwrap();
        assert_eq!(config.listen, "0.0.0.0:1350".parse().unwrap());
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.window, 64);
        assert_eq!(config.prebuffer(), 1);
        assert_eq!(config.priority, 80);
    }

    #[test]
    fn test_short_options() {
        let args = parse(&[
            "-h", "127.0.0.1", "-p", "5004", "-j", "60", "-c", "1", "-f", "480", "-vv",
        ]);
        assert_eq!(args.verbose, 2);

        let config = RxConfig::try_from(args).unwrap();
        assert_eq!(config.listen, "127.0.0.1:5004".parse().unwrap());
        assert_eq!(config.audio.channels, 1);
        // 60ms of 10ms frames
        assert_eq!(config.prebuffer(), 6);

        let playout = config.playout();
        assert_eq!(playout.payload_len, 80);
        assert_eq!(playout.frame, 480);
    }

    #[test]
    fn test_prebuffer_larger_than_window() {
        let args = parse(&["-j", "1000", "--jitter-window", "8"]);
        assert!(matches!(
            RxConfig::try_from(args),
            Err(StartupError::Config(_))
        ));
    }

    #[test]
    fn test_zero_window_rejected() {
        let args = parse(&["--jitter-window", "0"]);
        assert!(RxConfig::try_from(args).is_err());
    }

    #[test]
    fn test_invalid_audio_rejected() {
        let args = parse(&["-r", "44100"]);
        assert!(RxConfig::try_from(args).is_err());
    }

    #[test]
    fn test_long_help_only() {
        let result = Args::try_parse_from(["rx", "--help"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::DisplayHelp
        );
    }
}
