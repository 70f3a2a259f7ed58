//! Upstream registry client.
//!
//! One [`Uplink`] exists per configured upstream. It performs conditional
//! manifest fetches with ETag validation, streams tarballs with progress
//! reporting and transfer-length verification, and isolates failures behind
//! a per-uplink circuit breaker so one dead upstream never takes cached
//! packages offline.

mod breaker;
mod client;
mod download;
pub mod error;

pub use client::{FetchOptions, FetchOutcome, RemoteManifest, Uplink};
pub use download::{DownloadOptions, DownloadStream, Progress, ProgressFn};
pub use error::{Result, UplinkError};
