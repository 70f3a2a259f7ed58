//! The error boundary of the engine.
//!
//! Backend and uplink errors are translated into this taxonomy at the store
//! layer; the HTTP layer maps each variant onto a status code. Uplink errors
//! reaching a caller always mean no cached data could answer the request.

use thiserror::Error;

use wharf_storage::StorageError;
use wharf_uplink::UplinkError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadData(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("transferred {transferred} bytes, upstream announced {expected}")]
    ContentMismatch { expected: u64, transferred: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn package_not_found() -> Self {
        StoreError::NotFound("package not found".to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => StoreError::package_not_found(),
            StorageError::Conflict => StoreError::Conflict("package already exists".to_string()),
            StorageError::Unsupported(what) => {
                StoreError::Unavailable(format!("backend does not support {what}"))
            }
            StorageError::Cancelled => StoreError::Cancelled,
            StorageError::InvalidFilename(filename) => {
                StoreError::BadRequest(format!("invalid file name: {filename}"))
            }
            StorageError::Corrupt(err) => StoreError::BadData(format!("corrupt manifest: {err}")),
            StorageError::Io { action, source } => {
                StoreError::Internal(format!("error while {action}: {source}"))
            }
        }
    }
}

impl From<UplinkError> for StoreError {
    fn from(err: UplinkError) -> Self {
        match err {
            UplinkError::NotFound => StoreError::NotFound("package not found upstream".to_string()),
            UplinkError::Cancelled => StoreError::Cancelled,
            UplinkError::ContentMismatch {
                expected,
                transferred,
            } => StoreError::ContentMismatch {
                expected,
                transferred,
            },
            UplinkError::Unavailable { name, reason } => {
                StoreError::Unavailable(format!("uplink {name} unavailable: {reason}"))
            }
            UplinkError::Http(err) => StoreError::Unavailable(format!("uplink request failed: {err}")),
            UplinkError::Status(status) => {
                StoreError::Unavailable(format!("uplink answered with status {status}"))
            }
            UplinkError::Malformed(reason) => {
                StoreError::Unavailable(format!("uplink sent malformed data: {reason}"))
            }
            UplinkError::InvalidUrl(url) => StoreError::Internal(format!("invalid url: {url}")),
        }
    }
}

impl From<wharf_model::ModelError> for StoreError {
    fn from(err: wharf_model::ModelError) -> Self {
        match err {
            wharf_model::ModelError::InvalidName(name) => {
                StoreError::BadRequest(format!("invalid package name: {name}"))
            }
            other => StoreError::BadData(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
