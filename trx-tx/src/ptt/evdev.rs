//! Keyboard PTT through a Linux input event device

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read};
use std::mem::size_of;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use trx_common::StartupError;

use super::{KeyEvent, KeyEvents};

/// Size of one `struct input_event`: a timestamp then 8 bytes of payload
const EVENT_SIZE: usize = size_of::<libc::input_event>();

/// Events read per `read(2)`
const EVENTS_PER_READ: usize = 16;

const EV_KEY: u16 = 0x01;

const KEY_RELEASED: i32 = 0;
const KEY_PRESSED: i32 = 1;

/// Decode one `input_event` record into a key transition
///
/// The record ends with `type: u16, code: u16, value: i32` in native byte
/// order after a timestamp whose width depends on the target. Non-key
/// events and auto-repeat (value 2) yield `None`.
pub fn parse_event(record: &[u8]) -> Option<KeyEvent> {
    if record.len() < 8 {
        return None;
    }
    let tail = &record[record.len() - 8..];

    let kind = u16::from_ne_bytes([tail[0], tail[1]]);
    let code = u16::from_ne_bytes([tail[2], tail[3]]);
    let value = i32::from_ne_bytes([tail[4], tail[5], tail[6], tail[7]]);

    if kind != EV_KEY {
        return None;
    }

    match value {
        KEY_PRESSED => Some(KeyEvent {
            code,
            pressed: true,
        }),
        KEY_RELEASED => Some(KeyEvent {
            code,
            pressed: false,
        }),
        _ => None,
    }
}

/// Input event device opened read-only
#[derive(Debug)]
pub struct EvdevKeyboard {
    file: File,
    path: PathBuf,
    buf: Vec<u8>,
    pending: VecDeque<KeyEvent>,
}

impl EvdevKeyboard {
    /// Open the event device at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StartupError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| StartupError::Ptt {
            device: path.display().to_string(),
            source,
        })?;

        Ok(Self {
            file,
            path,
            buf: vec![0u8; EVENT_SIZE * EVENTS_PER_READ],
            pending: VecDeque::new(),
        })
    }

    /// Path the device was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait until the device is readable or `timeout` passes
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut pollfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;

        // SAFETY: `pollfd` is a valid, exclusively borrowed array of one
        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        match rc {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
            0 => Ok(false),
            _ if pollfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 => Err(io::Error::other(
                format!("{}: device error", self.path.display()),
            )),
            _ => Ok(true),
        }
    }
}

impl KeyEvents for EvdevKeyboard {
    fn next_event(&mut self, timeout: Duration) -> io::Result<Option<KeyEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        if !self.wait_readable(timeout)? {
            return Ok(None);
        }

        let n = match self.file.read(&mut self.buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{}: device closed", self.path.display()),
                ));
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(None),
            Err(e) => return Err(e),
        };

        if n % EVENT_SIZE != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("short input event read ({} bytes)", n),
            ));
        }

        self.pending
            .extend(self.buf[..n].chunks_exact(EVENT_SIZE).filter_map(parse_event));

        Ok(self.pending.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn record(kind: u16, code: u16, value: i32) -> Vec<u8> {
        let mut bytes = vec![0u8; EVENT_SIZE - 8];
        bytes.extend_from_slice(&kind.to_ne_bytes());
        bytes.extend_from_slice(&code.to_ne_bytes());
        bytes.extend_from_slice(&value.to_ne_bytes());
        bytes
    }

    #[test]
    fn test_parse_key_events() {
        assert_eq!(
            parse_event(&record(EV_KEY, 29, 1)),
            Some(KeyEvent {
                code: 29,
                pressed: true
            })
        );
        assert_eq!(
            parse_event(&record(EV_KEY, 29, 0)),
            Some(KeyEvent {
                code: 29,
                pressed: false
            })
        );
    }

    #[test]
    fn test_parse_kernel_record() {
        // SAFETY: input_event is plain old data; all-zero is a valid value
        let mut event: libc::input_event = unsafe { std::mem::zeroed() };
        event.type_ = EV_KEY;
        event.code = 57;
        event.value = KEY_PRESSED;

        // SAFETY: reads exactly the bytes of `event`, which outlives the slice
        let bytes = unsafe {
            std::slice::from_raw_parts((&event as *const libc::input_event).cast::<u8>(), EVENT_SIZE)
        };
        assert_eq!(
            parse_event(bytes),
            Some(KeyEvent {
                code: 57,
                pressed: true
            })
        );
    }

    #[test]
    fn test_parse_ignores_repeat_and_other_types() {
        assert_eq!(parse_event(&record(EV_KEY, 29, 2)), None);
        // EV_SYN and EV_MSC
        assert_eq!(parse_event(&record(0x00, 0, 0)), None);
        assert_eq!(parse_event(&record(0x04, 4, 29)), None);
        assert_eq!(parse_event(&[0u8; 4]), None);
    }

    #[test]
    fn test_reads_recorded_events() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut bytes = Vec::new();
        bytes.extend(record(EV_KEY, 29, 1));
        bytes.extend(record(0x00, 0, 0));
        bytes.extend(record(EV_KEY, 29, 2));
        bytes.extend(record(EV_KEY, 29, 0));
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let mut keyboard = EvdevKeyboard::open(file.path()).unwrap();
        let timeout = Duration::from_millis(10);

        assert_eq!(
            keyboard.next_event(timeout).unwrap(),
            Some(KeyEvent {
                code: 29,
                pressed: true
            })
        );
        assert_eq!(
            keyboard.next_event(timeout).unwrap(),
            Some(KeyEvent {
                code: 29,
                pressed: false
            })
        );

        // End of a regular file stands in for an unplugged device
        assert!(keyboard.next_event(timeout).is_err());
    }

    #[test]
    fn test_truncated_record_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 5]).unwrap();
        file.flush().unwrap();

        let mut keyboard = EvdevKeyboard::open(file.path()).unwrap();
        let err = keyboard.next_event(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_open_missing_device() {
        let err = EvdevKeyboard::open("/nonexistent/event-kbd").unwrap_err();
        assert!(matches!(err, StartupError::Ptt { .. }));
    }
}
