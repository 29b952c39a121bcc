//! Storage backend error types
//!
//! Error codes:
//! - CHRONO_STORAGE_IO_ERROR (ERROR severity)
//! - CHRONO_STORAGE_WRITE_FAILED (ERROR severity)
//! - CHRONO_STORAGE_READ_FAILED (ERROR severity)
//! - CHRONO_DATA_CORRUPTION (FATAL severity)

use std::fmt;
use std::io;

use crate::error::Severity;

/// Backend-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorCode {
    /// Disk I/O failure
    ChronoStorageIoError,
    /// Journal append failed
    ChronoStorageWriteFailed,
    /// Journal read failed
    ChronoStorageReadFailed,
    /// Checksum failure or malformed record
    ChronoDataCorruption,
}

impl StorageErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            StorageErrorCode::ChronoStorageIoError => "CHRONO_STORAGE_IO_ERROR",
            StorageErrorCode::ChronoStorageWriteFailed => "CHRONO_STORAGE_WRITE_FAILED",
            StorageErrorCode::ChronoStorageReadFailed => "CHRONO_STORAGE_READ_FAILED",
            StorageErrorCode::ChronoDataCorruption => "CHRONO_DATA_CORRUPTION",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            StorageErrorCode::ChronoDataCorruption => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for StorageErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Storage error with code, message and optional context
#[derive(Debug)]
pub struct StorageError {
    code: StorageErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl StorageError {
    /// Create a new storage I/O error
    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: StorageErrorCode::ChronoStorageIoError,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create a new write failed error
    pub fn write_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: StorageErrorCode::ChronoStorageWriteFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create a new read failed error
    pub fn read_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: StorageErrorCode::ChronoStorageReadFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create a new data corruption error (FATAL)
    pub fn data_corruption(message: impl Into<String>) -> Self {
        Self {
            code: StorageErrorCode::ChronoDataCorruption,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Create a data corruption error with byte offset context
    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self {
            code: StorageErrorCode::ChronoDataCorruption,
            message: reason.into(),
            details: Some(format!("byte_offset: {}", offset)),
            source: None,
        }
    }

    /// Create a data corruption error with table context
    pub fn corruption_in_table(table: &str, reason: impl Into<String>) -> Self {
        Self {
            code: StorageErrorCode::ChronoDataCorruption,
            message: reason.into(),
            details: Some(format!("table: {}", table)),
            source: None,
        }
    }

    pub fn code(&self) -> StorageErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether the backend must not be used further
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for backend operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            StorageErrorCode::ChronoDataCorruption.code(),
            "CHRONO_DATA_CORRUPTION"
        );
        assert_eq!(
            StorageErrorCode::ChronoStorageWriteFailed.code(),
            "CHRONO_STORAGE_WRITE_FAILED"
        );
    }

    #[test]
    fn test_corruption_is_fatal() {
        assert!(StorageError::data_corruption("bad").is_fatal());
        let err = StorageError::write_failed(
            "disk full",
            io::Error::new(io::ErrorKind::Other, "ENOSPC"),
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_display_contains_details() {
        let err = StorageError::corruption_at_offset(128, "checksum mismatch");
        let display = format!("{}", err);
        assert!(display.contains("CHRONO_DATA_CORRUPTION"));
        assert!(display.contains("FATAL"));
        assert!(display.contains("byte_offset: 128"));
    }
}
