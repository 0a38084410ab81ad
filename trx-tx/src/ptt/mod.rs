//! Push-to-talk (PTT) monitoring
//!
//! A background watcher thread owns the input device and is the only
//! writer of the shared PTT state. The transmit loop reads that state
//! through a `PttHandle`, which is a single atomic load and never blocks.
//!
//! Two kinds of input are supported:
//! * edge sources report discrete press/release events (a keyboard's
//!   event device), filtered by key code; these can invoke callbacks
//! * level sources are sampled (a GPIO line); they have no edges of their
//!   own, so callers diff successive samples themselves

mod evdev;
mod gpio;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clap::ValueEnum;
use tracing::{debug, info, warn};
use trx_common::StartupError;

pub use evdev::{EvdevKeyboard, parse_event};
pub use gpio::{GpioChipLine, SysfsGpioLine};

// =============================================================================
// Constants
// =============================================================================

/// Keyboard event device used when none is given
pub const DEFAULT_EVDEV_DEVICE: &str = "/dev/input/by-path/platform-i8042-serio-0-event-kbd";

/// Default PTT key (KEY_LEFTCTRL)
pub const DEFAULT_PTT_KEYCODE: u16 = 29;

/// GPIO character device used when none is given
pub const DEFAULT_GPIO_CHIP: &str = "/dev/gpiochip0";

/// Default GPIO line for the PTT button
pub const DEFAULT_PTT_GPIO_PIN: u32 = 1;

/// Longest an edge watcher waits for an event before checking for exit
pub const EVENT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Interval between level source samples
pub const LEVEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

// =============================================================================
// PTT State
// =============================================================================

/// Observed state of the PTT control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PttState {
    /// No event seen yet, or the input failed
    #[default]
    Unknown = 0,
    /// Control is held
    Pressed = 1,
    /// Control is not held
    Released = 2,
}

impl PttState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Pressed,
            2 => Self::Released,
            _ => Self::Unknown,
        }
    }

    fn from_pressed(pressed: bool) -> Self {
        if pressed { Self::Pressed } else { Self::Released }
    }
}

/// State shared between the watcher and its readers
#[derive(Debug, Default)]
struct Shared {
    state: AtomicU8,
    exit: AtomicBool,
}

impl Shared {
    fn load(&self) -> PttState {
        PttState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Store `state`, returning the previous one
    fn swap(&self, state: PttState) -> PttState {
        PttState::from_u8(self.state.swap(state as u8, Ordering::AcqRel))
    }
}

/// Read-only view of a monitor's state
#[derive(Debug, Clone)]
pub struct PttHandle {
    shared: Arc<Shared>,
}

impl PttHandle {
    /// Current state
    pub fn state(&self) -> PttState {
        self.shared.load()
    }

    /// Whether the control is held; `Unknown` counts as released
    pub fn is_pressed(&self) -> bool {
        self.state() == PttState::Pressed
    }

    /// A handle with no watcher behind it
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
        }
    }

    #[cfg(test)]
    pub(crate) fn set(&self, state: PttState) {
        self.shared.swap(state);
    }
}

// =============================================================================
// Inputs
// =============================================================================

/// One key transition from an edge source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// Key code the event is for
    pub code: u16,
    /// `true` on press, `false` on release
    pub pressed: bool,
}

/// Source of discrete key events
pub trait KeyEvents: Send {
    /// Wait up to `timeout` for the next key transition
    ///
    /// # Returns
    /// * `Ok(Some(event))` - A press or release arrived
    /// * `Ok(None)` - Nothing within `timeout`
    /// * `Err(e)` - The device failed; the watcher stops
    fn next_event(&mut self, timeout: Duration) -> io::Result<Option<KeyEvent>>;
}

/// Line whose level can be sampled at any time
pub trait LineLevel: Send {
    /// Whether the line is currently asserted
    fn is_high(&mut self) -> io::Result<bool>;
}

/// Device the watcher owns
pub enum PttInput {
    /// Discrete events, filtered by `keycode`
    Edge {
        /// Event stream from the device
        events: Box<dyn KeyEvents>,
        /// Key that acts as PTT
        keycode: u16,
    },
    /// Sampled line state
    Level {
        /// Line to sample
        line: Box<dyn LineLevel>,
    },
}

/// Which kind of PTT input to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PttSource {
    /// Linux input event device (keyboard)
    #[default]
    Evdev,
    /// GPIO line on a character device (`/dev/gpiochipN`)
    Gpio,
    /// GPIO line through the legacy sysfs value file
    GpioSysfs,
}

/// How to find and interpret the PTT input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PttConfig {
    /// Kind of input device
    pub source: PttSource,
    /// Event device, GPIO chip, or GPIO value file, overriding the default
    pub device: Option<PathBuf>,
    /// Key that acts as PTT on an event device
    pub keycode: u16,
    /// Line offset on the GPIO chip, or exported sysfs line number
    pub gpio_pin: u32,
}

impl Default for PttConfig {
    fn default() -> Self {
        Self {
            source: PttSource::default(),
            device: None,
            keycode: DEFAULT_PTT_KEYCODE,
            gpio_pin: DEFAULT_PTT_GPIO_PIN,
        }
    }
}

impl PttConfig {
    /// Open the configured device
    pub fn open(&self) -> Result<PttInput, StartupError> {
        match self.source {
            PttSource::Evdev => {
                let path = self
                    .device
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_EVDEV_DEVICE));
                Ok(PttInput::Edge {
                    events: Box::new(EvdevKeyboard::open(&path)?),
                    keycode: self.keycode,
                })
            }
            PttSource::Gpio => {
                let chip = self
                    .device
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_GPIO_CHIP));
                Ok(PttInput::Level {
                    line: Box::new(GpioChipLine::open(&chip, self.gpio_pin)?),
                })
            }
            PttSource::GpioSysfs => {
                let line = match &self.device {
                    Some(path) => SysfsGpioLine::open_path(path)?,
                    None => SysfsGpioLine::open(self.gpio_pin)?,
                };
                Ok(PttInput::Level {
                    line: Box::new(line),
                })
            }
        }
    }
}

// =============================================================================
// PTT Monitor
// =============================================================================

/// Edge callback, run on the watcher thread; must not block
pub type Callback = Box<dyn Fn() + Send>;

/// Configures callbacks before the watcher starts
pub struct PttMonitorBuilder {
    input: PttInput,
    on_pressed: Option<Callback>,
    on_released: Option<Callback>,
}

impl PttMonitorBuilder {
    /// Run `callback` each time the key goes down (edge sources only)
    pub fn on_pressed(mut self, callback: impl Fn() + Send + 'static) -> Self {
        self.on_pressed = Some(Box::new(callback));
        self
    }

    /// Run `callback` each time the key comes up (edge sources only)
    pub fn on_released(mut self, callback: impl Fn() + Send + 'static) -> Self {
        self.on_released = Some(Box::new(callback));
        self
    }

    /// Spawn the watcher thread, handing it the input device
    pub fn start(self) -> io::Result<PttMonitor> {
        let shared = Arc::new(Shared::default());
        let watcher_shared = shared.clone();

        let builder = thread::Builder::new().name("ptt".into());
        let watcher = match self.input {
            PttInput::Edge { events, keycode } => {
                let callbacks = EdgeCallbacks {
                    on_pressed: self.on_pressed,
                    on_released: self.on_released,
                };
                builder.spawn(move || watch_edges(&watcher_shared, events, keycode, callbacks))?
            }
            PttInput::Level { line } => {
                if self.on_pressed.is_some() || self.on_released.is_some() {
                    warn!("level PTT input has no edges; callbacks ignored");
                }
                builder.spawn(move || watch_level(&watcher_shared, line))?
            }
        };

        Ok(PttMonitor {
            shared,
            watcher: Some(watcher),
        })
    }
}

/// Owns the PTT watcher thread
pub struct PttMonitor {
    shared: Arc<Shared>,
    watcher: Option<JoinHandle<()>>,
}

impl PttMonitor {
    /// Configure a monitor for `input`
    pub fn builder(input: PttInput) -> PttMonitorBuilder {
        PttMonitorBuilder {
            input,
            on_pressed: None,
            on_released: None,
        }
    }

    /// Start a monitor without callbacks
    pub fn start(input: PttInput) -> io::Result<Self> {
        Self::builder(input).start()
    }

    /// Reader for the transmit loop
    pub fn handle(&self) -> PttHandle {
        PttHandle {
            shared: self.shared.clone(),
        }
    }

    /// Current state
    pub fn state(&self) -> PttState {
        self.shared.load()
    }

    /// Whether the control is held
    pub fn is_pressed(&self) -> bool {
        self.state() == PttState::Pressed
    }

    /// Stop the watcher and release the device
    ///
    /// Blocks for at most one poll interval.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.exit.store(true, Ordering::Release);
        if let Some(watcher) = self.watcher.take()
            && watcher.join().is_err()
        {
            warn!("PTT watcher panicked");
        }
    }
}

impl Drop for PttMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Watchers
// =============================================================================

struct EdgeCallbacks {
    on_pressed: Option<Callback>,
    on_released: Option<Callback>,
}

fn watch_edges(
    shared: &Shared,
    mut events: Box<dyn KeyEvents>,
    keycode: u16,
    callbacks: EdgeCallbacks,
) {
    debug!(keycode, "PTT watcher started");

    while !shared.exit.load(Ordering::Acquire) {
        let event = match events.next_event(EVENT_POLL_TIMEOUT) {
            Ok(Some(event)) if event.code == keycode => event,
            Ok(_) => continue,
            Err(e) => {
                warn!("PTT input failed: {}", e);
                shared.swap(PttState::Unknown);
                return;
            }
        };

        let next = PttState::from_pressed(event.pressed);
        if shared.swap(next) == next {
            continue;
        }

        debug!(state = ?next, "PTT");
        let callback = if event.pressed {
            &callbacks.on_pressed
        } else {
            &callbacks.on_released
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    // `events` drops here, closing the device
    debug!("PTT watcher stopped");
}

fn watch_level(shared: &Shared, mut line: Box<dyn LineLevel>) {
    debug!("PTT watcher started");
    let mut failing = false;

    while !shared.exit.load(Ordering::Acquire) {
        let pressed = match line.is_high() {
            Ok(high) => {
                if failing {
                    info!("PTT line readable again");
                    failing = false;
                }
                high
            }
            Err(e) => {
                // Unreadable line counts as released
                if !failing {
                    warn!("PTT line read failed: {}", e);
                    failing = true;
                }
                false
            }
        };

        shared.swap(PttState::from_pressed(pressed));
        thread::sleep(LEVEL_POLL_INTERVAL);
    }

    debug!("PTT watcher stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

    use super::*;

    const KEY: u16 = DEFAULT_PTT_KEYCODE;

    /// Edge source fed from a channel; disconnecting it is a device failure
    struct ChannelEvents(Receiver<KeyEvent>);

    impl KeyEvents for ChannelEvents {
        fn next_event(&mut self, timeout: Duration) -> io::Result<Option<KeyEvent>> {
            match self.0.recv_timeout(timeout) {
                Ok(event) => Ok(Some(event)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    Err(io::Error::new(io::ErrorKind::BrokenPipe, "device removed"))
                }
            }
        }
    }

    /// Level source backed by a flag
    struct FlagLine {
        level: Arc<AtomicBool>,
        fail: Arc<AtomicBool>,
    }

    impl LineLevel for FlagLine {
        fn is_high(&mut self) -> io::Result<bool> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(io::Error::other("read failed"));
            }
            Ok(self.level.load(Ordering::Relaxed))
        }
    }

    fn edge_input() -> (Sender<KeyEvent>, PttInput) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let input = PttInput::Edge {
            events: Box::new(ChannelEvents(rx)),
            keycode: KEY,
        };
        (tx, input)
    }

    fn key(code: u16, pressed: bool) -> KeyEvent {
        KeyEvent { code, pressed }
    }

    /// Poll until `state` is reached or a second passes
    fn wait_for(monitor: &PttMonitor, state: PttState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(1);
        while Instant::now() < deadline {
            if monitor.state() == state {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_press_release_callbacks() {
        let pressed = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let (tx, input) = edge_input();

        let monitor = {
            let pressed = pressed.clone();
            let released = released.clone();
            PttMonitor::builder(input)
                .on_pressed(move || {
                    pressed.fetch_add(1, Ordering::SeqCst);
                })
                .on_released(move || {
                    released.fetch_add(1, Ordering::SeqCst);
                })
                .start()
                .unwrap()
        };

        assert_eq!(monitor.state(), PttState::Unknown);
        assert!(!monitor.is_pressed());

        tx.send(key(KEY, true)).unwrap();
        assert!(wait_for(&monitor, PttState::Pressed));
        assert!(monitor.is_pressed());
        assert_eq!(pressed.load(Ordering::SeqCst), 1);

        // Press while pressed, and other keys, change nothing
        tx.send(key(KEY, true)).unwrap();
        tx.send(key(KEY + 1, false)).unwrap();
        tx.send(key(KEY, false)).unwrap();
        assert!(wait_for(&monitor, PttState::Released));
        assert!(!monitor.is_pressed());

        assert_eq!(pressed.load(Ordering::SeqCst), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        monitor.shutdown();
    }

    #[test]
    fn test_handle_follows_monitor() {
        let (tx, input) = edge_input();
        let monitor = PttMonitor::start(input).unwrap();
        let handle = monitor.handle();

        tx.send(key(KEY, true)).unwrap();
        assert!(wait_for(&monitor, PttState::Pressed));
        assert!(handle.is_pressed());
        assert_eq!(handle.state(), PttState::Pressed);
    }

    #[test]
    fn test_input_failure_resets_to_unknown() {
        let (tx, input) = edge_input();
        let monitor = PttMonitor::start(input).unwrap();

        tx.send(key(KEY, true)).unwrap();
        assert!(wait_for(&monitor, PttState::Pressed));

        drop(tx);
        assert!(wait_for(&monitor, PttState::Unknown));
        assert!(!monitor.is_pressed());
    }

    #[test]
    fn test_shutdown_is_bounded() {
        let (_tx, input) = edge_input();
        let monitor = PttMonitor::start(input).unwrap();

        let started = Instant::now();
        monitor.shutdown();
        assert!(started.elapsed() < EVENT_POLL_TIMEOUT * 10);
    }

    #[test]
    fn test_level_input_follows_line() {
        let level = Arc::new(AtomicBool::new(false));
        let fail = Arc::new(AtomicBool::new(false));
        let input = PttInput::Level {
            line: Box::new(FlagLine {
                level: level.clone(),
                fail: fail.clone(),
            }),
        };
        let monitor = PttMonitor::start(input).unwrap();

        assert!(wait_for(&monitor, PttState::Released));

        level.store(true, Ordering::Relaxed);
        assert!(wait_for(&monitor, PttState::Pressed));

        // Unreadable line counts as released
        fail.store(true, Ordering::Relaxed);
        assert!(wait_for(&monitor, PttState::Released));

        fail.store(false, Ordering::Relaxed);
        assert!(wait_for(&monitor, PttState::Pressed));

        let started = Instant::now();
        drop(monitor);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_state_roundtrip_through_atomic() {
        let handle = PttHandle::detached();
        assert_eq!(handle.state(), PttState::Unknown);
        handle.set(PttState::Released);
        assert_eq!(handle.state(), PttState::Released);
        handle.set(PttState::Pressed);
        assert!(handle.is_pressed());
    }

    #[test]
    fn test_missing_device_is_startup_error() {
        let config = PttConfig {
            device: Some(PathBuf::from("/nonexistent/trx-ptt-event")),
            ..Default::default()
        };
        assert!(matches!(config.open(), Err(StartupError::Ptt { .. })));

        let config = PttConfig {
            source: PttSource::Gpio,
            device: Some(PathBuf::from("/nonexistent/gpiochip9")),
            ..Default::default()
        };
        assert!(matches!(config.open(), Err(StartupError::Ptt { .. })));

        let config = PttConfig {
            source: PttSource::GpioSysfs,
            device: Some(PathBuf::from("/nonexistent/gpio/value")),
            ..Default::default()
        };
        assert!(matches!(config.open(), Err(StartupError::Ptt { .. })));
    }

    #[test]
    fn test_sysfs_value_file_opens_level_input() {
        let dir = tempfile::tempdir().unwrap();
        let value = dir.path().join("value");
        std::fs::write(&value, "1\n").unwrap();

        let config = PttConfig {
            source: PttSource::GpioSysfs,
            device: Some(value),
            ..Default::default()
        };
        match config.open() {
            Ok(PttInput::Level { mut line }) => assert!(line.is_high().unwrap()),
            _ => panic!("expected a level input"),
        }
    }
}
