//! Command-line argument parsing

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use trx_common::config::AudioConfig;
use trx_common::{
    DEFAULT_BITRATE_KBPS, DEFAULT_BUFFER_MS, DEFAULT_CHANNELS, DEFAULT_DEVICE, DEFAULT_FRAME,
    DEFAULT_PORT, DEFAULT_RATE, DEFAULT_REALTIME_PRIORITY, StartupError,
};

use crate::ptt::{DEFAULT_PTT_GPIO_PIN, DEFAULT_PTT_KEYCODE, PttConfig, PttSource};
use crate::transmit::{MutePolicy, TransmitConfig};

/// Capture audio and send it over UDP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host to send to (name or address)
    pub host: String,

    /// Audio input device name
    #[arg(short = 'd', long, default_value = DEFAULT_DEVICE)]
    pub device: String,

    /// Audio device buffer time (milliseconds)
    #[arg(short = 'm', long = "buffer", default_value_t = DEFAULT_BUFFER_MS)]
    pub buffer_ms: u32,

    /// UDP port to send to
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Sample rate (Hz)
    #[arg(short = 'r', long, default_value_t = DEFAULT_RATE)]
    pub rate: u32,

    /// Number of channels
    #[arg(short = 'c', long, default_value_t = DEFAULT_CHANNELS)]
    pub channels: u16,

    /// Frame size (samples per channel)
    #[arg(short = 'f', long, default_value_t = DEFAULT_FRAME)]
    pub frame: usize,

    /// Codec bitrate (kbps)
    #[arg(short = 'b', long, default_value_t = DEFAULT_BITRATE_KBPS)]
    pub bitrate: u32,

    /// Realtime scheduling priority
    #[arg(long, default_value_t = DEFAULT_REALTIME_PRIORITY)]
    pub priority: i32,

    /// Gate transmission with a push-to-talk control
    #[arg(long, default_value = "false")]
    pub ptt: bool,

    /// Push-to-talk input kind
    #[arg(long = "ptt-source", value_enum, default_value_t = PttSource::Evdev)]
    pub ptt_source: PttSource,

    /// Push-to-talk event device, GPIO chip, or GPIO sysfs value file
    #[arg(long = "ptt-device")]
    pub ptt_device: Option<PathBuf>,

    /// Push-to-talk key code (evdev)
    #[arg(long = "ptt-key", default_value_t = DEFAULT_PTT_KEYCODE)]
    pub ptt_key: u16,

    /// Push-to-talk GPIO line offset (gpio) or exported line number (gpio-sysfs)
    #[arg(long = "ptt-gpio-pin", default_value_t = DEFAULT_PTT_GPIO_PIN)]
    pub ptt_gpio_pin: u32,

    /// What to send while push-to-talk is released
    #[arg(long = "mute-policy", value_enum, default_value_t = MutePolicy::Silence)]
    pub mute_policy: MutePolicy,

    /// Increase verbosity (repeat for more)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

// =============================================================================
// Transmitter Config
// =============================================================================

/// Validated transmitter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxConfig {
    /// Device and codec parameters
    pub audio: AudioConfig,
    /// Remote host
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Realtime scheduling priority for the transmit thread
    pub priority: i32,
    /// Behavior while PTT is released
    pub mute_policy: MutePolicy,
    /// PTT input, when gating is enabled
    pub ptt: Option<PttConfig>,
}

impl TxConfig {
    /// Parameters for the transmit path
    pub fn transmit(&self) -> TransmitConfig {
        TransmitConfig {
            payload_len: self.audio.payload_len(),
            frame: self.audio.frame,
            channels: self.audio.channels as usize,
            mute_policy: self.mute_policy,
        }
    }
}

impl TryFrom<Args> for TxConfig {
    type Error = StartupError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let audio = AudioConfig {
            device: args.device,
            buffer_ms: args.buffer_ms,
            rate: args.rate,
            channels: args.channels,
            frame: args.frame,
            bitrate_kbps: args.bitrate,
        };
        audio.validate()?;

        if args.host.is_empty() {
            return Err(StartupError::Config("host must not be empty".into()));
        }

        let ptt = args.ptt.then(|| PttConfig {
            source: args.ptt_source,
            device: args.ptt_device,
            keycode: args.ptt_key,
            gpio_pin: args.ptt_gpio_pin,
        });

        Ok(Self {
            audio,
            host: args.host,
            port: args.port,
            priority: args.priority,
            mute_policy: args.mute_policy,
            ptt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("tx").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = TxConfig::try_from(parse(&["radio.local"])).unwrap();
        assert_eq!(config.host, "radio.local");
        assert_eq!(config.port, 1350);
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.mute_policy, MutePolicy::Silence);
        assert!(config.ptt.is_none());
        assert_eq!(config.transmit().payload_len, 160);
    }

    #[test]
    fn test_host_required() {
        assert!(Args::try_parse_from(["tx"]).is_err());
    }

    #[test]
    fn test_ptt_options() {
        let args = parse(&[
            "10.0.0.2",
            "--ptt",
            "--ptt-source",
            "gpio",
            "--ptt-gpio-pin",
            "17",
            "--mute-policy",
            "skip",
        ]);
        let config = TxConfig::try_from(args).unwrap();

        assert_eq!(config.mute_policy, MutePolicy::Skip);
        let ptt = config.ptt.unwrap();
        assert_eq!(ptt.source, PttSource::Gpio);
        assert_eq!(ptt.gpio_pin, 17);
        assert_eq!(ptt.keycode, 29);
        assert!(ptt.device.is_none());
    }

    #[test]
    fn test_ptt_options_ignored_without_flag() {
        let config = TxConfig::try_from(parse(&["10.0.0.2", "--ptt-key", "57"])).unwrap();
        assert!(config.ptt.is_none());
    }

    #[test]
    fn test_invalid_audio_rejected() {
        let args = parse(&["10.0.0.2", "-f", "100"]);
        assert!(matches!(
            TxConfig::try_from(args),
            Err(StartupError::Config(_))
        ));
    }
}
