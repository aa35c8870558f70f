//! Error and warning types shared by every stage of the pipeline.
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures that stop the current stage.
#[derive(Error, Debug)]
pub enum Error {
    /// An external command exited with a non-zero status (or was killed by a signal).
    #[error("Command `{command}` failed (exit={status:?}): {stderr}")]
    ExternalCommand {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The image could not be written to the device. The device contents are undefined.
    #[error("Flashing {device} failed: {reason}")]
    Flash { device: PathBuf, reason: String },

    /// No candidate boot partition could be mounted.
    #[error("Could not mount EFI partition {partition}")]
    Mount { partition: PathBuf },

    /// The mount point holds data that is not a leftover mount; it is never cleared.
    #[error("Mount point {path} is in use (not an empty directory or a stale mount)")]
    MountPointInUse { path: PathBuf },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Operation cancelled by user")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A recoverable problem reported alongside a successful result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Warning {
    /// What was being attempted, e.g. "copy .env".
    pub context: String,
    pub message: String,
}

impl Warning {
    pub fn new(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.message)
    }
}

/// The value of a best-effort operation together with everything that went
/// wrong along the way without stopping it.
#[derive(Clone, Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Outcome<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, warning: Warning) {
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}
