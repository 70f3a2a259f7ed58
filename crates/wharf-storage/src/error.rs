//! Error type shared by all storage backends.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("package or file not found")]
    NotFound,

    #[error("package already exists")]
    Conflict,

    #[error("backend does not support {0}")]
    Unsupported(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid file name: {0}")]
    InvalidFilename(String),

    #[error("stored manifest is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("error while {action}: {source}")]
    Io {
        action: String,
        source: std::io::Error,
    },
}

impl From<wharf_model::ModelError> for StorageError {
    fn from(err: wharf_model::ModelError) -> Self {
        match err {
            wharf_model::ModelError::Malformed(err) => StorageError::Corrupt(err),
            other => StorageError::Io {
                action: "decoding manifest".to_string(),
                source: std::io::Error::other(other.to_string()),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Extension trait attaching an action description to raw I/O errors, with
/// ENOENT mapped onto the backend's not-found.
pub trait ErrorContext<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String,
    {
        self.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound
            } else {
                StorageError::Io {
                    action: context(),
                    source: err,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enoent_maps_to_not_found() {
        let err: std::io::Result<()> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(matches!(
            err.with_context(|| "reading".to_string()),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn test_other_io_keeps_context() {
        let err: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "nope",
        ));
        let Err(StorageError::Io { action, .. }) = err.with_context(|| "writing index".to_string())
        else {
            panic!("expected io error");
        };
        assert_eq!(action, "writing index");
    }
}
