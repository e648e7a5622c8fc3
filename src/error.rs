use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EdfError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Invalid source recording: {0}")]
    InvalidSource(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Signal index {0} out of range")]
    InvalidSignalIndex(usize),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("File is discontinuous")]
    DiscontinuousFile,

    #[error("Memory allocation error: {0}")]
    MemoryError(String),

    #[error("Invalid header size")]
    InvalidHeader,

    #[error("Invalid number of signals: {0}")]
    InvalidSignalCount(i32),

    #[error("Physical min equals physical max")]
    PhysicalMinEqualsMax,

    #[error("Digital min equals digital max")]
    DigitalMinEqualsMax,

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Conversion cancelled")]
    Cancelled,
}

/// Coarse classification of a failed conversion
///
/// Every category is local to one conversion and none is retried by the
/// library; a caller decides whether to run the conversion again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The input is not what the transcoder accepts (signature, layout,
    /// inconsistent channel parameters, missing metadata, bad date/time).
    SourceInvalid,
    /// Working buffers could not be allocated.
    Resource,
    /// Reading the source or writing the destination failed.
    Io,
    /// The user aborted the conversion. Not a failure.
    Cancelled,
    /// The caller passed options the transcoder cannot honour.
    Usage,
}

impl EdfError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EdfError::Io(_) | EdfError::FileNotFound(_) => ErrorCategory::Io,
            EdfError::MemoryError(_) => ErrorCategory::Resource,
            EdfError::Cancelled => ErrorCategory::Cancelled,
            EdfError::InvalidArgument(_) | EdfError::Config(_) => ErrorCategory::Usage,
            EdfError::InvalidFormat(_)
            | EdfError::InvalidSource(_)
            | EdfError::InvalidSignalIndex(_)
            | EdfError::UnsupportedFileType(_)
            | EdfError::DiscontinuousFile
            | EdfError::InvalidHeader
            | EdfError::InvalidSignalCount(_)
            | EdfError::PhysicalMinEqualsMax
            | EdfError::DigitalMinEqualsMax
            | EdfError::Xml(_) => ErrorCategory::SourceInvalid,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EdfError::Cancelled)
    }
}

impl From<roxmltree::Error> for EdfError {
    fn from(e: roxmltree::Error) -> Self {
        EdfError::Xml(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EdfError>;
