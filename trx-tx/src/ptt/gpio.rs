//! GPIO PTT lines
//!
//! `GpioChipLine` requests the line from a GPIO character device
//! (`/dev/gpiochipN`), the interface current kernels provide.
//! `SysfsGpioLine` reads the legacy `/sys/class/gpio` value file, for
//! kernels still built with `CONFIG_GPIO_SYSFS` and for test fixtures.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use trx_common::StartupError;

use super::LineLevel;

// =============================================================================
// Character Device
// =============================================================================

/// Most lines one handle request can carry (`GPIOHANDLES_MAX`)
const GPIOHANDLES_MAX: usize = 64;

/// Request the lines as inputs
const GPIOHANDLE_REQUEST_INPUT: u32 = 1 << 0;

/// Consumer label shown by `gpioinfo`
const CONSUMER: &[u8] = b"PTT";

/// `struct gpiohandle_request` from `<linux/gpio.h>`
#[repr(C)]
struct GpioHandleRequest {
    lineoffsets: [u32; GPIOHANDLES_MAX],
    flags: u32,
    default_values: [u8; GPIOHANDLES_MAX],
    consumer_label: [u8; 32],
    lines: u32,
    fd: libc::c_int,
}

/// `struct gpiohandle_data` from `<linux/gpio.h>`
#[repr(C)]
struct GpioHandleData {
    values: [u8; GPIOHANDLES_MAX],
}

/// `_IOWR(0xB4, nr, size)` with the generic ioctl encoding
const fn gpio_iowr(nr: u32, size: usize) -> u32 {
    (3 << 30) | ((size as u32) << 16) | (0xB4 << 8) | nr
}

const GPIO_GET_LINEHANDLE_IOCTL: u32 = gpio_iowr(0x03, size_of::<GpioHandleRequest>());
const GPIOHANDLE_GET_LINE_VALUES_IOCTL: u32 = gpio_iowr(0x08, size_of::<GpioHandleData>());

/// Input line requested from a GPIO character device
#[derive(Debug)]
pub struct GpioChipLine {
    /// Line handle returned by the chip
    line: OwnedFd,
    chip: PathBuf,
    offset: u32,
}

impl GpioChipLine {
    /// Request line `offset` of `chip` as an input
    ///
    /// The chip itself is closed again once the line handle is held.
    pub fn open(chip: impl AsRef<Path>, offset: u32) -> Result<Self, StartupError> {
        let chip = chip.as_ref().to_path_buf();
        let ptt_err = |source| StartupError::Ptt {
            device: format!("{} line {}", chip.display(), offset),
            source,
        };

        let file = File::open(&chip).map_err(ptt_err)?;
        let line = request_input(&file, offset).map_err(ptt_err)?;

        Ok(Self { line, chip, offset })
    }

    /// Character device the line belongs to
    pub fn chip(&self) -> &Path {
        &self.chip
    }

    /// Line offset on the chip
    pub fn offset(&self) -> u32 {
        self.offset
    }
}

fn request_input(chip: &File, offset: u32) -> io::Result<OwnedFd> {
    let mut request = GpioHandleRequest {
        lineoffsets: [0; GPIOHANDLES_MAX],
        flags: GPIOHANDLE_REQUEST_INPUT,
        default_values: [0; GPIOHANDLES_MAX],
        consumer_label: [0; 32],
        lines: 1,
        fd: -1,
    };
    request.lineoffsets[0] = offset;
    request.consumer_label[..CONSUMER.len()].copy_from_slice(CONSUMER);

    // SAFETY: `request` is a live, correctly laid out gpiohandle_request
    let rc = unsafe {
        libc::ioctl(
            chip.as_raw_fd(),
            GPIO_GET_LINEHANDLE_IOCTL as _,
            &mut request as *mut GpioHandleRequest,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: on success the kernel hands us a new descriptor we alone own
    Ok(unsafe { OwnedFd::from_raw_fd(request.fd) })
}

impl LineLevel for GpioChipLine {
    fn is_high(&mut self) -> io::Result<bool> {
        let mut data = GpioHandleData {
            values: [0; GPIOHANDLES_MAX],
        };

        // SAFETY: `data` is a live, correctly laid out gpiohandle_data
        let rc = unsafe {
            libc::ioctl(
                self.line.as_raw_fd(),
                GPIOHANDLE_GET_LINE_VALUES_IOCTL as _,
                &mut data as *mut GpioHandleData,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(data.values[0] != 0)
    }
}

// =============================================================================
// Sysfs
// =============================================================================

/// GPIO line exported under `/sys/class/gpio`
#[derive(Debug)]
pub struct SysfsGpioLine {
    file: File,
    path: PathBuf,
}

impl SysfsGpioLine {
    /// Open an exported line by number
    pub fn open(pin: u32) -> Result<Self, StartupError> {
        Self::open_path(format!("/sys/class/gpio/gpio{}/value", pin))
    }

    /// Open a line value file directly
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, StartupError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| StartupError::Ptt {
            device: path.display().to_string(),
            source,
        })?;

        Ok(Self { file, path })
    }

    /// Path of the value file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LineLevel for SysfsGpioLine {
    /// Any non-zero value is asserted
    fn is_high(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; 16];
        self.file.seek(SeekFrom::Start(0))?;
        let n = self.file.read(&mut buf)?;

        let text = std::str::from_utf8(&buf[..n])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let value: i64 = text.trim().parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: unexpected value {:?}", self.path.display(), text.trim()),
            )
        })?;

        Ok(value != 0)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_reads_level_changes() {
        let dir = tempfile::tempdir().unwrap();
        let value = dir.path().join("value");
        fs::write(&value, "0\n").unwrap();

        let mut line = SysfsGpioLine::open_path(&value).unwrap();
        assert!(!line.is_high().unwrap());

        fs::write(&value, "1\n").unwrap();
        assert!(line.is_high().unwrap());

        fs::write(&value, "0\n").unwrap();
        assert!(!line.is_high().unwrap());
    }

    #[test]
    fn test_garbage_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let value = dir.path().join("value");
        fs::write(&value, "high\n").unwrap();

        let mut line = SysfsGpioLine::open_path(&value).unwrap();
        assert_eq!(
            line.is_high().unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );

        fs::write(&value, "").unwrap();
        assert!(line.is_high().is_err());
    }

    #[test]
    fn test_handle_request_layout() {
        assert_eq!(size_of::<GpioHandleRequest>(), 364);
        assert_eq!(size_of::<GpioHandleData>(), 64);
        assert_eq!(GPIO_GET_LINEHANDLE_IOCTL, 0xC16C_B403);
        assert_eq!(GPIOHANDLE_GET_LINE_VALUES_IOCTL, 0xC040_B408);
    }

    #[test]
    fn test_chip_line_rejects_non_chip() {
        // A regular file answers the line request with ENOTTY
        let file = tempfile::NamedTempFile::new().unwrap();
        match GpioChipLine::open(file.path(), 1) {
            Err(StartupError::Ptt { device, .. }) => assert!(device.ends_with("line 1")),
            other => panic!("expected PTT error, got {:?}", other),
        }

        assert!(matches!(
            GpioChipLine::open("/nonexistent/gpiochip9", 1),
            Err(StartupError::Ptt { .. })
        ));
    }

    #[test]
    fn test_unexported_pin() {
        assert!(matches!(
            SysfsGpioLine::open(65535),
            Err(StartupError::Ptt { .. })
        ));
    }
}
