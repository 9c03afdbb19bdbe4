//! Errors that cross the collector boundary.
//!
//! Item-level failures (one file, one command, one service) never become a
//! `DiagError`; they are logged into the run log and skipped. What remains
//! here are the conditions a caller has to react to.

use std::io;
use std::path::PathBuf;

/// Errors returned by a collection run and its collaborators.
///
/// # Examples
///
/// ```rust
/// use wb_diag_collect::error::{DiagError, ResultCode};
///
/// let err = DiagError::NotFound { path: "/var/lib/wirenboard/short_sn.conf".into() };
/// assert!(err.to_string().contains("short_sn.conf"));
/// assert_eq!(err.result_code(), ResultCode::OperationError);
/// ```
#[derive(Debug, thiserror::Error)]
pub enum DiagError {
    /// A file the run cannot do without is missing.
    #[error("File {} not found", path.display())]
    NotFound { path: PathBuf },

    /// Filesystem or process error outside the scope of a single item.
    #[error("OSError: with file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A collection is already in flight.
    #[error("{}", crate::constants::ERROR_STILL_RUNNING)]
    Busy,

    /// Broker connection or protocol failure.
    #[error("MQTT error: {0}")]
    Mqtt(String),
}

impl DiagError {
    /// Wrap an I/O error, mapping `NotFound` onto its own variant.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            DiagError::NotFound { path }
        } else {
            DiagError::Io { path, source }
        }
    }

    pub fn result_code(&self) -> ResultCode {
        match self {
            DiagError::Config(_) => ResultCode::UserInputError,
            _ => ResultCode::OperationError,
        }
    }
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    Ok = 0,
    OperationError = 1,
    UserInputError = 2,
}

impl From<ResultCode> for std::process::ExitCode {
    fn from(code: ResultCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

/// Convenience type alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, DiagError>;
