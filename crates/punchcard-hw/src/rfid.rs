//! Line-oriented RFID readers.
//!
//! USB RFID readers usually present as a keyboard (or a serial adapter) and
//! emit the tag code followed by a newline. Codes are returned raw; format
//! validation is the caller's job.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use crate::face::CaptureError;
use crate::pump::spawn_line_pump;

/// Event-driven source of scanned codes.
pub trait RfidReader: Send {
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Wait up to `timeout` for the next scan. `Ok(None)` means no scan
    /// arrived in time.
    fn next_code(&mut self, timeout: Duration) -> Result<Option<String>, CaptureError>;

    fn close(&mut self);
}

type Opener = Box<dyn FnMut() -> Result<Box<dyn Read + Send>, CaptureError> + Send>;

/// Reads one code per line from a device node, a file or stdin.
pub struct LineRfidReader {
    label: String,
    opener: Opener,
    lines: Option<mpsc::Receiver<String>>,
}

impl LineRfidReader {
    /// Reader backed by a device node such as `/dev/ttyUSB0`.
    pub fn device(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let label = path.display().to_string();
        Self {
            label,
            opener: Box::new(move || {
                let file = File::open(&path).map_err(|e| match e.kind() {
                    ErrorKind::NotFound => CaptureError::DeviceNotFound(path.display().to_string()),
                    ErrorKind::PermissionDenied => {
                        CaptureError::PermissionDenied(path.display().to_string())
                    }
                    _ => CaptureError::CaptureFailed(format!("{}: {e}", path.display())),
                })?;
                Ok(Box::new(file) as Box<dyn Read + Send>)
            }),
            lines: None,
        }
    }

    /// Reader on the process's standard input (keyboard-wedge readers on a
    /// dedicated terminal, or an operator typing codes).
    pub fn stdin() -> Self {
        Self::from_reader("stdin", std::io::stdin())
    }

    /// Reader over any byte stream; opened once.
    pub fn from_reader<R>(label: &str, reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        let mut reader = Some(reader);
        Self {
            label: label.to_string(),
            opener: Box::new(move || {
                reader
                    .take()
                    .map(|r| Box::new(r) as Box<dyn Read + Send>)
                    .ok_or(CaptureError::Closed)
            }),
            lines: None,
        }
    }
}

impl RfidReader for LineRfidReader {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.lines.is_some() {
            return Ok(());
        }
        let reader = (self.opener)()?;
        let lines = spawn_line_pump("punchcard-rfid", reader)
            .map_err(|e| CaptureError::CaptureFailed(format!("reader thread: {e}")))?;
        self.lines = Some(lines);
        tracing::info!(reader = %self.label, "RFID reader opened");
        Ok(())
    }

    fn next_code(&mut self, timeout: Duration) -> Result<Option<String>, CaptureError> {
        let lines = self.lines.as_ref().ok_or(CaptureError::Closed)?;
        loop {
            match lines.recv_timeout(timeout) {
                Ok(line) => {
                    let code = line.trim();
                    if code.is_empty() {
                        continue;
                    }
                    return Ok(Some(code.to_string()));
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(CaptureError::Closed),
            }
        }
    }

    fn close(&mut self) {
        if self.lines.take().is_some() {
            tracing::info!(reader = %self.label, "RFID reader closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reads_codes_and_skips_blank_lines() {
        let mut reader = LineRfidReader::from_reader("test", Cursor::new("AB1234\n\n  cd5678 \n"));
        reader.open().unwrap();
        let timeout = Duration::from_secs(2);
        assert_eq!(reader.next_code(timeout).unwrap().as_deref(), Some("AB1234"));
        assert_eq!(reader.next_code(timeout).unwrap().as_deref(), Some("cd5678"));
        assert!(matches!(reader.next_code(timeout), Err(CaptureError::Closed)));
    }

    #[test]
    fn test_next_code_before_open_is_closed() {
        let mut reader = LineRfidReader::from_reader("test", Cursor::new(""));
        assert!(matches!(
            reader.next_code(Duration::from_millis(1)),
            Err(CaptureError::Closed)
        ));
    }

    #[test]
    fn test_missing_device_node() {
        let mut reader = LineRfidReader::device("/dev/punchcard-no-such-reader");
        assert!(matches!(reader.open(), Err(CaptureError::DeviceNotFound(_))));
    }

    #[test]
    fn test_reopen_after_close_of_one_shot_reader() {
        let mut reader = LineRfidReader::from_reader("test", Cursor::new("AB1234\n"));
        reader.open().unwrap();
        reader.close();
        assert!(matches!(reader.open(), Err(CaptureError::Closed)));
    }
}
