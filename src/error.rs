use std::{io, path::PathBuf};

use thiserror::Error;

/// Failures raised by the peripheral layer.
///
/// Only [`HardwareError::InvalidChannel`] ever reaches callers of the drivers: it is a
/// programming error. Every other variant is absorbed by the driver, logged, and replaced
/// by a "no signal" value or a no-op.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// The peripheral is missing or failed to initialise (e.g. running off-device).
    #[error("{what} unavailable")]
    Unavailable {
        /// Peripheral that could not be reached.
        what: &'static str,
    },
    /// A caller asked for an analog channel the multiplexer does not have.
    #[error("analog channel {channel} out of range (multiplexer has {available} channels)")]
    InvalidChannel {
        /// Requested channel.
        channel: u8,
        /// Number of channels on the multiplexer.
        available: u8,
    },
    /// Reading or writing a peripheral file failed.
    #[error("peripheral I/O failed at `{path}`")]
    Io {
        /// File backing the peripheral.
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A peripheral returned something that is not a number.
    #[error("unexpected reading `{raw}` at `{path}`")]
    Malformed {
        /// File backing the peripheral.
        path: PathBuf,
        /// Raw contents.
        raw: String,
    },
}

impl HardwareError {
    /// Build an [`HardwareError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        HardwareError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures while producing a photo. The capture service replaces the photo with a placeholder.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No camera command is installed.
    #[error("no camera command available")]
    NoCamera,
    /// The camera command could not be started.
    #[error("failed to run `{command}`")]
    Spawn {
        /// Program that failed to start.
        command: String,
        #[source]
        source: io::Error,
    },
    /// The camera command exited unsuccessfully.
    #[error("`{command}` exited with {status}")]
    Exit {
        /// Program that failed.
        command: String,
        /// Exit status description.
        status: String,
    },
    /// Writing the placeholder file failed.
    #[error("failed to write placeholder `{path}`")]
    Placeholder {
        /// Placeholder path.
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures while transferring a photo. Uploads are best effort; these are only logged.
#[derive(Debug, Error)]
pub enum UploadError {
    /// No remote configured or rclone missing.
    #[error("uploader not configured")]
    Disabled,
    /// rclone could not be started.
    #[error("failed to run rclone")]
    Spawn(#[source] io::Error),
    /// rclone exited unsuccessfully.
    #[error("rclone exited with {0}")]
    Exit(String),
}

/// Invalid controller configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid JSON for the expected layout.
    #[error("failed to parse config")]
    Parse(#[from] serde_json::Error),
    /// The document parsed but describes an impossible layout.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Unknown or malformed token typed on the operator console.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    /// Nothing was typed.
    #[error("empty command")]
    Empty,
    /// The token is not part of the command vocabulary.
    #[error("unknown command `{0}`")]
    Unknown(String),
    /// The target id is not between 1 and the configured target count.
    #[error("target {target} is outside 1..={max}")]
    TargetOutOfRange {
        /// Requested target.
        target: u8,
        /// Configured target count.
        max: u8,
    },
    /// A dispense command named something other than a team.
    #[error("unknown team `{0}`")]
    UnknownTeam(String),
}
