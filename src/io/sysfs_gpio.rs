//! Linux sysfs GPIO backend
//!
//! Lines are exported through `<root>/export`, configured through
//! `<root>/gpioN/direction` and driven/read through `<root>/gpioN/value`.
//! The value file stays open for the line's lifetime so echo polling is a
//! seek + 1-byte read. Outputs are driven low and every line is unexported
//! on drop.

use crate::io::gpio::{InputLine, OutputLine};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// udev may need a moment to apply permissions after export
const EXPORT_RETRIES: usize = 20;
const EXPORT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// An exported line; unexports on drop
struct ExportedLine {
    root: PathBuf,
    line: u32,
    value: File,
}

impl ExportedLine {
    fn export(root: &str, line: u32, direction: &str) -> io::Result<Self> {
        let root = PathBuf::from(root);
        let line_dir = root.join(format!("gpio{line}"));

        if !line_dir.exists() {
            match fs::write(root.join("export"), line.to_string()) {
                Ok(()) => {}
                // Already exported by someone else
                Err(e) if e.raw_os_error() == Some(16) => {}
                Err(e) => return Err(e),
            }
        }

        let direction_path = line_dir.join("direction");
        let mut attempt = 0;
        loop {
            match fs::write(&direction_path, direction) {
                Ok(()) => break,
                Err(e)
                    if attempt < EXPORT_RETRIES
                        && matches!(e.kind(), ErrorKind::PermissionDenied | ErrorKind::NotFound) =>
                {
                    attempt += 1;
                    thread::sleep(EXPORT_RETRY_DELAY);
                }
                Err(e) => return Err(e),
            }
        }

        let value = OpenOptions::new().read(true).write(true).open(line_dir.join("value"))?;
        debug!(line = line, direction = direction, "gpio_line_exported");
        Ok(Self { root, line, value })
    }

    fn write_level(&mut self, high: bool) -> io::Result<()> {
        self.value.seek(SeekFrom::Start(0))?;
        self.value.write_all(if high { b"1" } else { b"0" })
    }

    fn read_level(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; 1];
        self.value.seek(SeekFrom::Start(0))?;
        self.value.read_exact(&mut buf)?;
        Ok(buf[0] == b'1')
    }

    fn unexport(&self) {
        if let Err(e) = fs::write(unexport_path(&self.root), self.line.to_string()) {
            warn!(line = self.line, error = %e, "gpio_unexport_failed");
        }
    }
}

fn unexport_path(root: &Path) -> PathBuf {
    root.join("unexport")
}

/// Output line; "low" direction configures it as an output already driven low
pub struct SysfsOutput {
    inner: ExportedLine,
}

impl SysfsOutput {
    pub fn open(root: &str, line: u32) -> io::Result<Self> {
        Ok(Self { inner: ExportedLine::export(root, line, "low")? })
    }
}

impl OutputLine for SysfsOutput {
    fn set_high(&mut self) -> io::Result<()> {
        self.inner.write_level(true)
    }

    fn set_low(&mut self) -> io::Result<()> {
        self.inner.write_level(false)
    }
}

impl Drop for SysfsOutput {
    fn drop(&mut self) {
        if let Err(e) = self.inner.write_level(false) {
            warn!(line = self.inner.line, error = %e, "gpio_release_low_failed");
        }
        self.inner.unexport();
    }
}

pub struct SysfsInput {
    inner: ExportedLine,
}

impl SysfsInput {
    pub fn open(root: &str, line: u32) -> io::Result<Self> {
        Ok(Self { inner: ExportedLine::export(root, line, "in")? })
    }
}

impl InputLine for SysfsInput {
    fn is_high(&mut self) -> io::Result<bool> {
        self.inner.read_level()
    }
}

impl Drop for SysfsInput {
    fn drop(&mut self) {
        self.inner.unexport();
    }
}
