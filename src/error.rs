//! Error types for GDS operations

use parking_lot::Mutex;
use thiserror::Error;

/// Main error type for GDS operations
#[derive(Error, Debug)]
pub enum GdsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),

    #[error("Index out of range: {0}")]
    IndexOutOfRange(String),

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Class not registered: {0}")]
    ClassNotRegistered(String),

    #[error("Class already registered: {0}")]
    ClassAlreadyRegistered(String),

    #[error("Read-only violation: {0}")]
    ReadOnlyViolation(String),

    #[error("Corrupt stream: {0}")]
    CorruptStream(String),

    #[error("Selection mismatch: {0}")]
    SelectionMismatch(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Unsupported GDS version: {0}.{1}")]
    UnsupportedVersion(u16, u16),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Workspace is not bound to a genotype array")]
    Unbound,
}

/// Specialized Result type for GDS operations
pub type Result<T> = std::result::Result<T, GdsError>;

impl GdsError {
    pub fn invalid_dimension(msg: impl Into<String>) -> Self {
        Self::InvalidDimension(msg.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::IndexOutOfRange(msg.into())
    }

    pub fn unsupported_type(msg: impl Into<String>) -> Self {
        Self::UnsupportedType(msg.into())
    }

    pub fn read_only(msg: impl Into<String>) -> Self {
        Self::ReadOnlyViolation(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptStream(msg.into())
    }
}

impl From<bincode::Error> for GdsError {
    fn from(err: bincode::Error) -> Self {
        GdsError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for GdsError {
    fn from(err: serde_json::Error) -> Self {
        GdsError::Serialization(err.to_string())
    }
}

impl From<ndarray::ShapeError> for GdsError {
    fn from(err: ndarray::ShapeError) -> Self {
        GdsError::InvalidDimension(err.to_string())
    }
}

impl From<std::collections::TryReserveError> for GdsError {
    fn from(err: std::collections::TryReserveError) -> Self {
        GdsError::OutOfMemory(err.to_string())
    }
}

/// Process-wide slot holding the message of the most recent recorded failure.
///
/// Only meaningful immediately after a call failed, and only for the thread
/// that made that call; any later failure overwrites it.
static LAST_ERROR: Mutex<String> = parking_lot::const_mutex(String::new());

/// Message of the most recently recorded error, empty if none
pub fn last_error() -> String {
    LAST_ERROR.lock().clone()
}

/// Clear the last-error slot
pub fn clear_last_error() {
    LAST_ERROR.lock().clear();
}

fn set_last_error(message: String) {
    *LAST_ERROR.lock() = message;
}

/// Mirror a failed result's message into the last-error slot
pub trait RecordError {
    fn record_error(self) -> Self;
}

impl<T> RecordError for Result<T> {
    fn record_error(self) -> Self {
        if let Err(err) = &self {
            set_last_error(err.to_string());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_error_sets_slot() {
        let failed: Result<()> = Err(GdsError::corrupt("bad prefix"));
        let _ = failed.record_error();
        assert!(last_error().contains("bad prefix"));

        let ok: Result<u8> = Ok(1);
        let _ = ok.record_error();
        assert!(last_error().contains("bad prefix"));

        clear_last_error();
        assert!(last_error().is_empty());
    }

    #[test]
    fn test_try_reserve_maps_to_out_of_memory() {
        let mut v: Vec<u8> = Vec::new();
        let err: GdsError = v.try_reserve(usize::MAX).unwrap_err().into();
        assert!(matches!(err, GdsError::OutOfMemory(_)));
    }
}
