//! Configuration for the wharf registry engine.
//!
//! The engine is configured with a storage root, a table of upstream
//! registries (uplinks) and an ordered list of per-package rules. The HTTP
//! and auth layers read the same file; only the keys the engine consumes are
//! modeled here.

pub mod config;
pub mod error;
pub mod packages;
pub mod uplink;

pub use config::Config;
pub use error::{ConfigError, Result};
pub use packages::PackageRule;
pub use uplink::UplinkConfig;
