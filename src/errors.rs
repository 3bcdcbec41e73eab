//! errors.rs
//! Error taxonomy for the rig driver.
//!
//! - ConnectError: no device / port busy. Only "connected mode" is lost, never the process.
//! - LinkError: I/O failure, timeout, short frame. The driver demotes to disconnected mode.
//! - ProtocolSequenceError: the calling loop broke request/response alternation.
//! - CalibrationError / ConfigError: fatal at startup only.
//! - WindProfileError: an unreadable profile file is rejected, the current wind mode stays.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("no serial device matching '{filter}'")]
    NoMatchingDevice { filter: String },

    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),

    #[error("failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("failed to reset buffers on {port}: {source}")]
    Flush {
        port: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("serial I/O failed: {0}")]
    Io(#[source] io::Error),

    #[error("serial link timed out")]
    Timeout,

    #[error("short frame: expected {expected} bytes")]
    ShortFrame { expected: usize },

    #[error("link is closed")]
    Closed,
}

impl From<io::Error> for LinkError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => LinkError::Timeout,
            _ => LinkError::Io(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolSequenceError {
    /// A frame was read but the actuator reply has not been sent yet.
    #[error("frame already received; transmit actuators first")]
    FrameNotConsumed,

    /// Actuators were sent without reading a frame first.
    #[error("no frame received; receive first")]
    NoFrameRead,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Sequence(#[from] ProtocolSequenceError),
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("failed to read calibration file: {0}")]
    Io(#[from] io::Error),

    #[error("bad calibration JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("calibration value '{field}' is not finite")]
    NonFinite { field: String },

    #[error("drivetrain table mismatch: {factors} factors, {biases} biases")]
    LevelTableMismatch { factors: usize, biases: usize },

    #[error("drivetrain table is empty")]
    EmptyLevelTable,

    #[error("anemometer curve needs at least 3 distinct samples, got {0}")]
    AnemometerCurve(usize),

    #[error("anemometer curve mismatch: {counts} counts, {speeds} speeds")]
    AnemometerMismatch { counts: usize, speeds: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("bad config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A `[min, max]` pair is inverted or not a number.
    #[error("config limits '{field}' are inverted or not finite")]
    InvalidLimits { field: &'static str },
}

#[derive(Debug, Error)]
pub enum WindProfileError {
    #[error("failed to read wind profile: {0}")]
    Io(#[from] io::Error),

    #[error("bad wind profile row: {0}")]
    Row(#[from] csv::Error),

    #[error("wind profile ends inside its {expected}-line header")]
    TruncatedHeader { expected: usize },
}
