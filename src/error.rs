use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IdaError {
    #[error("invalid instrument name: {0}")]
    InvalidInstrument(String),

    #[error("invalid period (expected YYYY-MM): {0}")]
    InvalidPeriod(String),

    #[error("invalid IDA filename: {0}")]
    InvalidFilename(String),

    #[error("invalid instrument selector: {0}")]
    InvalidSelector(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IDA request failed for {file}: {message}")]
    Network { file: String, message: String },

    #[error("IDA server returned status {status} for {file}: {message}")]
    HttpStatus {
        file: String,
        status: u16,
        message: String,
    },

    #[error("no monthly file on server: {0}")]
    NotFound(String),

    #[error("malformed IDA file {file}: {reason}")]
    Parse { file: String, reason: String },

    #[error("[{instrument}] no position in header or coordinates table for {file}")]
    #[diagnostic(help(
        "add coordinates with `tess-ida coords add` and re-run with --force"
    ))]
    MissingPosition { instrument: String, file: String },

    #[error("coordinates already registered for {0}")]
    #[diagnostic(help("use `tess-ida coords update` to change them"))]
    PositionExists(String),

    #[error("no coordinates registered for {0}")]
    PositionUnknown(String),

    #[error("auxiliary store error: {0}")]
    Store(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("cannot combine {file}: columns differ from the other artifacts")]
    ColumnMismatch { file: String },

    #[error("deadline reached before {0} completed")]
    Cancelled(String),
}

impl IdaError {
    /// Store errors invalidate the skip-cache and end the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IdaError::Store(_))
    }

    pub fn parse(file: impl Into<String>, reason: impl Into<String>) -> Self {
        IdaError::Parse {
            file: file.into(),
            reason: reason.into(),
        }
    }
}
