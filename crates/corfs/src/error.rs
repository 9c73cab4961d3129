//! Error types for corfs.
//!
//! Store and handle operations return `std::io::Result`. Conditions that
//! corfs itself detects are described by [`CorFsError`] and carried inside
//! an `io::Error` with a stable kind, so callers can match on either.

use std::io;
use std::path::PathBuf;

/// Failures raised by the corfs layer rather than by a backing store.
#[derive(Debug, thiserror::Error)]
pub enum CorFsError {
    /// A subtree was requested at a path that cannot be a directory.
    #[error("not a directory: {}", .0.display())]
    NotDir(PathBuf),

    /// A path resolved outside the root of a subtree view.
    #[error("path escapes subtree root: {}", .0.display())]
    EscapesRoot(PathBuf),

    /// The handle was used after `close()`.
    #[error("file already closed: {0}")]
    Closed(String),
}

impl CorFsError {
    fn kind(&self) -> io::ErrorKind {
        match self {
            CorFsError::NotDir(_) => io::ErrorKind::InvalidInput,
            CorFsError::EscapesRoot(_) => io::ErrorKind::PermissionDenied,
            CorFsError::Closed(_) => io::ErrorKind::Other,
        }
    }
}

impl From<CorFsError> for io::Error {
    fn from(err: CorFsError) -> Self {
        io::Error::new(err.kind(), err)
    }
}

/// The sentinel returned when a subtree cannot be derived at `path`.
pub fn not_dir(path: impl Into<PathBuf>) -> io::Error {
    CorFsError::NotDir(path.into()).into()
}

/// True if `err` is the not-a-directory sentinel.
pub fn is_not_dir(err: &io::Error) -> bool {
    matches!(
        err.get_ref().and_then(|e| e.downcast_ref::<CorFsError>()),
        Some(CorFsError::NotDir(_))
    )
}

/// True if `err` reports use of a closed handle.
pub fn is_closed(err: &io::Error) -> bool {
    matches!(
        err.get_ref().and_then(|e| e.downcast_ref::<CorFsError>()),
        Some(CorFsError::Closed(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_dir_sentinel() {
        let err = not_dir("a/b");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(is_not_dir(&err));
        assert!(err.to_string().contains("a/b"));
    }

    #[test]
    fn test_plain_invalid_input_is_not_sentinel() {
        let err = io::Error::new(io::ErrorKind::InvalidInput, "bad");
        assert!(!is_not_dir(&err));
    }

    #[test]
    fn test_closed_kind() {
        let err: io::Error = CorFsError::Closed("/f.txt".into()).into();
        assert!(is_closed(&err));
        assert!(!is_not_dir(&err));
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn test_escapes_root_kind() {
        let err: io::Error = CorFsError::EscapesRoot("../x".into()).into();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }
}
