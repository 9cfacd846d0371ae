//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the acquisition core.
//! Using the `thiserror` crate, it provides a single place where every failure the
//! pipeline can hit is named, from opening a serial port to writing the CSV archive.
//!
//! ## Error Hierarchy
//!
//! - **Transport errors** (`Connection`, `NotOpen`, `Write`, `WriteTimeout`, `Decode`,
//!   `UnexpectedEof`): raised by a [`LineTransport`](crate::transport::LineTransport).
//! - **Data errors** (`MalformedLine`): a raw line pair that does not parse into a sample.
//! - **State errors** (`TransitionRefused`): a user action that the acquisition state
//!   machine does not accept in its current state.
//! - **Ambient errors** (`Storage`, `Io`, `Config`, `SerialFeatureDisabled`).
//!
//! All transport, data and state errors are recoverable: the caller reports them and the
//! acquisition keeps running (or refuses the one transition). See
//! [`DaqError::is_recoverable`].

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the acquisition core.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The serial port could not be opened.
    #[error("could not connect to {port}: {reason}")]
    Connection {
        /// Port identifier that was requested.
        port: String,
        /// Driver-level reason.
        reason: String,
    },

    /// I/O was attempted before a successful `open`.
    #[error("serial port is not open")]
    NotOpen,

    /// The device rejected a write.
    #[error("failed to write to {port}: {reason}")]
    Write {
        /// Port the write was addressed to.
        port: String,
        /// Driver-level reason.
        reason: String,
    },

    /// The device did not accept a write within the configured timeout.
    #[error("write to {port} timed out after {timeout_ms} ms")]
    WriteTimeout {
        /// Port the write was addressed to.
        port: String,
        /// Configured write timeout.
        timeout_ms: u64,
    },

    /// A line contained bytes that are not valid UTF-8.
    #[error("could not decode line from {port}: {source}")]
    Decode {
        /// Port the line came from.
        port: String,
        /// Underlying decode error.
        #[source]
        source: std::string::FromUtf8Error,
    },

    /// The device closed the stream while a line was expected.
    #[error("unexpected end of stream from {port}")]
    UnexpectedEof {
        /// Port that reached end of stream.
        port: String,
    },

    /// A raw line does not consist of exactly three numeric fields.
    #[error("malformed line {line:?}: {reason}")]
    MalformedLine {
        /// The offending raw line.
        line: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The acquisition state machine refused a user action.
    #[error("cannot {action} while {state}")]
    TransitionRefused {
        /// Requested action (start, stop, reset).
        action: &'static str,
        /// State name at the time of the request.
        state: &'static str,
    },

    /// Start was requested before both boards were connected.
    #[error("both serial ports must be connected before starting")]
    PortsNotReady,

    /// Writing the archive failed.
    #[error("storage error: {0}")]
    Storage(#[from] csv::Error),

    /// Generic I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serial support was compiled out.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,
}

impl DaqError {
    /// Whether the error is surfaced to the user and then left behind.
    ///
    /// Only configuration and build-feature problems are fatal; everything the
    /// running pipeline can raise is reported and skipped.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DaqError::Config(_) | DaqError::SerialFeatureDisabled)
    }

    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        DaqError::MalformedLine {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(value.to_string())
    }
}
