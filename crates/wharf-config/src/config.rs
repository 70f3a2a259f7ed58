//! Top-level engine configuration and file loading.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::error::{ConfigError, Result};
use crate::packages::{match_package, PackageRule};
use crate::uplink::UplinkConfig;

/// Engine configuration, usually one section of the registry's config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of the filesystem storage backend.
    pub storage: PathBuf,

    /// Storage plugin reference. The embedder resolves it to a backend
    /// implementation; absent means the filesystem backend at `storage`.
    #[serde(default)]
    pub store: Option<String>,

    /// Path prefix clients see in rewritten tarball URLs.
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,

    /// Freezes revision tokens so fixtures stay reproducible.
    #[serde(default, alias = "_debug")]
    pub debug: bool,

    /// Upstream registries in declaration order. Earlier uplinks win when
    /// two report the same version.
    #[serde(default)]
    pub uplinks: Vec<UplinkConfig>,

    /// Ordered package rules, first match wins.
    #[serde(default)]
    pub packages: Vec<PackageRule>,
}

fn default_url_prefix() -> String {
    "/".to_string()
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        let config = config.validated()?;
        info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Validates uplink names and URLs and proxy references, and guarantees
    /// a rule matching every package name exists.
    pub fn validated(mut self) -> Result<Self> {
        let mut seen = HashSet::new();
        for uplink in &self.uplinks {
            if !seen.insert(uplink.name.as_str()) {
                return Err(ConfigError::DuplicateUplink(uplink.name.clone()));
            }
            if Url::parse(&uplink.url).is_err() {
                return Err(ConfigError::InvalidUplinkUrl {
                    name: uplink.name.clone(),
                    url: uplink.url.clone(),
                });
            }
        }

        for rule in &self.packages {
            for proxy in &rule.proxy {
                if !seen.contains(proxy.as_str()) {
                    return Err(ConfigError::UnknownProxy {
                        pattern: rule.pattern.clone(),
                        uplink: proxy.clone(),
                    });
                }
            }
        }

        if match_package(&self.packages, "any-package").is_none()
            || match_package(&self.packages, "@any/package").is_none()
        {
            self.packages
                .push(PackageRule::catch_all(self.uplink_names()));
        }

        Ok(self)
    }

    /// Uplink names in declaration order.
    pub fn uplink_names(&self) -> Vec<String> {
        self.uplinks.iter().map(|u| u.name.clone()).collect()
    }

    /// The rule governing `package`. `validated()` guarantees a match.
    pub fn rule_for(&self, package: &str) -> &PackageRule {
        match_package(&self.packages, package)
            .expect("validated config always has a catch-all rule")
    }

    /// Uplinks eligible for `package`, in declaration order.
    pub fn proxies_for(&self, package: &str) -> Vec<&UplinkConfig> {
        let rule = self.rule_for(package);
        self.uplinks
            .iter()
            .filter(|uplink| rule.proxy.iter().any(|proxy| *proxy == uplink.name))
            .collect()
    }
}
