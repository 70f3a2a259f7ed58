use thiserror::Error;

/// Errors raised while decoding or validating manifest documents.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("invalid package name: {0}")]
    InvalidName(String),

    #[error("malformed manifest: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("manifest field {field} has the wrong shape")]
    BadField { field: &'static str },
}

pub type Result<T> = std::result::Result<T, ModelError>;
