//! Error types for instrument communication and drivers.
//!
//! Every fallible operation in the library returns [`Result<T>`], an alias
//! over [`InstrumentError`]. The variants fall into a few groups:
//!
//! - **Transport**: `Io`, `Timeout`, `Serial`, `Visa`. These mean the link to
//!   the device is broken or silent. [`InstrumentError::is_io`] identifies
//!   them; the YAML loader uses it to decide whether a failed device is
//!   skipped with a warning or aborts the load.
//! - **Protocol**: `Acknowledgement`, `Prompt`, `Parse`, `BinaryBlock`,
//!   `Device`. The device answered, but not with what the driver expected.
//!   A `Parse` failure is retried once by [`crate::Instrument::query_parse`].
//! - **Value**: `OutOfRange`, `InvalidValue`, `IndexOutOfRange`,
//!   `Dimensionality`. Raised before anything is sent to the device.
//! - **Capability**: `NotSupported` for operations a model cannot perform.
//! - **Configuration**: `InvalidUri`, `Config`, `Yaml`, `Settings`.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type Result<T> = std::result::Result<T, InstrumentError>;

/// Errors raised by communicators, the instrument base and drivers.
#[derive(Error, Debug)]
pub enum InstrumentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0:?} waiting for the instrument")]
    Timeout(Duration),

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("VISA error: {0}")]
    Visa(String),

    #[error("Incorrect ACK message received: got {got:?} expected {expected:?}")]
    Acknowledgement { expected: String, got: String },

    #[error("Incorrect prompt message received: got {got:?} expected {expected:?}")]
    Prompt { expected: String, got: String },

    #[error("Could not parse instrument reply {input:?}: {reason}")]
    Parse { input: String, reason: String },

    #[error("Binary block error: {0}")]
    BinaryBlock(String),

    #[error("Instrument reported error {code}: {message}")]
    Device { code: i64, message: String },

    #[error("{0}")]
    OutOfRange(String),

    #[error("{0}")]
    InvalidValue(String),

    #[error("Index {index} out of range. Must be in {valid}.")]
    IndexOutOfRange { index: String, valid: String },

    #[error("Cannot convert from '{from}' to '{to}'")]
    Dimensionality { from: String, to: String },

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Invalid instrument URI: {0}")]
    InvalidUri(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),
}

impl InstrumentError {
    /// Builds a [`InstrumentError::Parse`] from the offending input.
    pub fn parse(input: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Parse {
            input: input.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures of the underlying transport.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Timeout(_) | Self::Serial(_) | Self::Visa(_)
        )
    }
}

impl From<figment::Error> for InstrumentError {
    fn from(err: figment::Error) -> Self {
        Self::Settings(Box::new(err))
    }
}

#[cfg(feature = "instrument_serial")]
impl From<tokio_serial::Error> for InstrumentError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::Serial(err.to_string())
    }
}
