use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("duplicate uplink name: {0}")]
    DuplicateUplink(String),

    #[error("invalid uplink url for {name}: {url}")]
    InvalidUplinkUrl { name: String, url: String },

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("package rule {pattern} proxies unknown uplink {uplink}")]
    UnknownProxy { pattern: String, uplink: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
