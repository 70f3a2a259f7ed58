use thiserror::Error;

#[derive(Error, Debug)]
pub enum UplinkError {
    #[error("package not found upstream")]
    NotFound,

    #[error("uplink {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected upstream status {0}")]
    Status(u16),

    #[error("upstream sent a malformed manifest: {0}")]
    Malformed(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("transferred {transferred} bytes, upstream announced {expected}")]
    ContentMismatch { expected: u64, transferred: u64 },

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, UplinkError>;
