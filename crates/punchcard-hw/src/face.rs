//! Face-embedding capture via an external extractor process.
//!
//! The extractor owns the camera and the embedding model. It speaks a
//! JSON-lines protocol on stdio: the kiosk writes `capture` to request one
//! sample and reads exactly one reply line per request.
//!
//! ```text
//! -> capture
//! <- {"event":"ready"}                                  (once, after camera metadata loads)
//! <- {"event":"face","embedding":[...],"bbox":{...}}
//! <- {"event":"no_face"}
//! <- {"event":"error","kind":"permission_denied","message":"..."}
//! ```

use std::io::{ErrorKind, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use punchcard_core::Embedding;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pump::spawn_line_pump;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device closed")]
    Closed,
}

/// Bounding box of the detected face in frame pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// One detection tick.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceSample {
    NoFace,
    Face {
        bbox: Option<BoundingBox>,
        embedding: Embedding,
    },
}

/// Whether the device reported its stream metadata before the wait expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Scored,
    /// Metadata never arrived; capture proceeds, but frame quality is unknown.
    Unscored,
}

/// A source of per-tick face samples.
pub trait FaceSource: Send {
    /// Acquire the device. Waits up to `metadata_wait` for stream metadata.
    fn open(&mut self, metadata_wait: Duration) -> Result<Readiness, CaptureError>;

    /// Capture and score one frame.
    fn sample(&mut self, timeout: Duration) -> Result<FaceSample, CaptureError>;

    /// Release the device. Idempotent.
    fn close(&mut self);
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ExtractorLine {
    Ready,
    Face {
        embedding: Vec<f32>,
        #[serde(default)]
        bbox: Option<BoundingBox>,
    },
    NoFace,
    Error {
        kind: String,
        #[serde(default)]
        message: String,
    },
}

fn parse_line(line: &str) -> Result<ExtractorLine, CaptureError> {
    serde_json::from_str(line)
        .map_err(|e| CaptureError::CaptureFailed(format!("malformed extractor output: {e}")))
}

fn error_from_extractor(kind: &str, message: String) -> CaptureError {
    match kind {
        "permission_denied" => CaptureError::PermissionDenied(message),
        "not_found" | "unavailable" => CaptureError::DeviceNotFound(message),
        "busy" => CaptureError::DeviceBusy,
        _ => CaptureError::CaptureFailed(format!("{kind}: {message}")),
    }
}

/// Extractor child process speaking the JSON-lines protocol.
pub struct ExtractorProcess {
    program: String,
    args: Vec<String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    lines: Option<mpsc::Receiver<String>>,
}

impl ExtractorProcess {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            child: None,
            stdin: None,
            lines: None,
        }
    }

    /// Split a shell-style command line on whitespace (no quoting).
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts))
    }

    fn receive(&self, timeout: Duration) -> Result<Option<ExtractorLine>, CaptureError> {
        let lines = self.lines.as_ref().ok_or(CaptureError::Closed)?;
        match lines.recv_timeout(timeout) {
            Ok(line) => parse_line(&line).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Closed),
        }
    }
}

impl FaceSource for ExtractorProcess {
    fn open(&mut self, metadata_wait: Duration) -> Result<Readiness, CaptureError> {
        if self.child.is_some() {
            return Ok(Readiness::Scored);
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => CaptureError::DeviceNotFound(self.program.clone()),
                ErrorKind::PermissionDenied => {
                    CaptureError::PermissionDenied(format!("{}: {e}", self.program))
                }
                _ => CaptureError::CaptureFailed(format!("spawn {}: {e}", self.program)),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::CaptureFailed("extractor stdout unavailable".into()))?;
        self.stdin = child.stdin.take();
        self.lines = Some(
            spawn_line_pump("punchcard-extractor", stdout)
                .map_err(|e| CaptureError::CaptureFailed(format!("reader thread: {e}")))?,
        );
        self.child = Some(child);

        tracing::info!(program = %self.program, "extractor started");

        match self.receive(metadata_wait) {
            Ok(Some(ExtractorLine::Ready)) => Ok(Readiness::Scored),
            Ok(Some(ExtractorLine::Error { kind, message })) => {
                self.close();
                Err(error_from_extractor(&kind, message))
            }
            Ok(Some(other)) => {
                tracing::warn!(?other, "unexpected extractor line before ready");
                Ok(Readiness::Unscored)
            }
            Ok(None) => {
                tracing::warn!(
                    wait_ms = metadata_wait.as_millis() as u64,
                    "camera metadata not reported in time; proceeding unscored"
                );
                Ok(Readiness::Unscored)
            }
            Err(CaptureError::Closed) => {
                self.close();
                Err(CaptureError::DeviceNotFound(format!(
                    "{} exited during startup",
                    self.program
                )))
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn sample(&mut self, timeout: Duration) -> Result<FaceSample, CaptureError> {
        // Drop replies to earlier requests that timed out.
        if let Some(lines) = &self.lines {
            let stale = lines.try_iter().count();
            if stale > 0 {
                tracing::debug!(stale, "discarded late extractor replies");
            }
        }

        let stdin = self.stdin.as_mut().ok_or(CaptureError::Closed)?;
        stdin
            .write_all(b"capture\n")
            .and_then(|_| stdin.flush())
            .map_err(|_| CaptureError::Closed)?;

        loop {
            match self.receive(timeout)? {
                None => return Err(CaptureError::Timeout(timeout)),
                Some(ExtractorLine::Ready) => continue,
                Some(ExtractorLine::NoFace) => return Ok(FaceSample::NoFace),
                Some(ExtractorLine::Face { embedding, bbox }) => {
                    return Ok(FaceSample::Face {
                        bbox,
                        embedding: Embedding::new(embedding),
                    })
                }
                Some(ExtractorLine::Error { kind, message }) => {
                    return Err(error_from_extractor(&kind, message))
                }
            }
        }
    }

    fn close(&mut self) {
        self.stdin = None;
        self.lines = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::debug!(error = %e, "extractor already exited");
            }
            let _ = child.wait();
            tracing::info!(program = %self.program, "extractor stopped");
        }
    }
}

impl Drop for ExtractorProcess {
    fn drop(&mut self) {
        self.close();
    }
}
