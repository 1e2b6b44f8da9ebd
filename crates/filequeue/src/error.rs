//! Error types for queued file operations.

use std::io;

use thiserror::Error;

/// Result alias used by every file operation.
pub type Result<T> = std::result::Result<T, FileError>;

/// Failure of a single file operation.
///
/// An error is delivered only to the caller of the operation that produced
/// it; later operations on the same path still run.
#[derive(Debug, Error)]
pub enum FileError {
    /// The target path does not exist.
    #[error("file not found: {path}")]
    NotFound {
        /// Path the operation was issued against.
        path: String,
    },

    /// Any other failure reported by the filesystem.
    #[error("IO error on {path}: {source}")]
    Io {
        /// Path the operation was issued against.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Content could not be decoded or encoded with the requested encoding.
    #[error("content of {path} is not valid {encoding}")]
    Encoding {
        /// Path the operation was issued against.
        path: String,
        /// Name of the encoding that was applied.
        encoding: String,
    },

    /// The operation was skipped because the one before it failed.
    #[error("skipped: previous operation on {path} failed")]
    PredecessorFailed {
        /// Path the operation was issued against.
        path: String,
    },

    /// The task running the operation ended without reporting a result.
    #[error("operation on {path} was aborted")]
    Aborted {
        /// Path the operation was issued against.
        path: String,
    },
}

impl FileError {
    /// Classify an `io::Error` raised while operating on `path`.
    pub fn from_io(path: impl Into<String>, error: io::Error) -> Self {
        let path = path.into();
        if error.kind() == io::ErrorKind::NotFound {
            FileError::NotFound { path }
        } else {
            FileError::Io {
                path,
                source: error,
            }
        }
    }

    /// Returns true if this is a [`FileError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, FileError::NotFound { .. })
    }

    /// Path the failing operation was issued against.
    pub fn path(&self) -> &str {
        match self {
            FileError::NotFound { path }
            | FileError::Io { path, .. }
            | FileError::Encoding { path, .. }
            | FileError::PredecessorFailed { path }
            | FileError::Aborted { path } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_classified() {
        let err = FileError::from_io("a.txt", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());
        assert_eq!(err.path(), "a.txt");
    }

    #[test]
    fn test_other_kinds_are_io() {
        let err = FileError::from_io(
            "a.txt",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, FileError::Io { .. }));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_display_includes_path() {
        let err = FileError::PredecessorFailed {
            path: "logs/out.txt".to_string(),
        };
        assert!(err.to_string().contains("logs/out.txt"));
    }
}
