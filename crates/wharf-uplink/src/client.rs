//! The per-upstream registry client.

use reqwest::header::{ACCEPT, ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use wharf_config::UplinkConfig;
use wharf_model::Manifest;
use wharf_utils::CancelToken;

use crate::breaker::CircuitBreaker;
use crate::download::{DownloadOptions, DownloadStream};
use crate::error::{Result, UplinkError};

/// A manifest fetched fresh from upstream, with its validation state.
#[derive(Debug)]
pub struct RemoteManifest {
    pub manifest: Manifest,
    pub etag: Option<String>,
    /// Epoch milliseconds of this fetch.
    pub fetched: i64,
}

#[derive(Debug)]
pub enum FetchOutcome {
    Fresh(Box<RemoteManifest>),
    /// Upstream confirmed the cached ETag is still current.
    NotModified,
}

#[derive(Clone, Default)]
pub struct FetchOptions {
    /// Cached ETag to validate with `If-None-Match`.
    pub etag: Option<String>,
    pub signal: CancelToken,
}

/// Client for one configured upstream registry.
pub struct Uplink {
    config: UplinkConfig,
    base: Url,
    client: reqwest::Client,
    breaker: CircuitBreaker,
}

impl Uplink {
    pub fn new(config: UplinkConfig) -> Result<Self> {
        let base =
            Url::parse(&config.url).map_err(|_| UplinkError::InvalidUrl(config.url.clone()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .user_agent(concat!("wharf/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let breaker = CircuitBreaker::new(config.max_fails, config.fail_window);
        Ok(Uplink {
            config,
            base,
            client,
            breaker,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Whether tarballs fetched through this uplink are cached locally.
    pub fn caches_tarballs(&self) -> bool {
        self.config.cache
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn manifest_url(&self, name: &str) -> Result<Url> {
        // scoped names keep the slash percent-encoded in registry paths
        let path = name.replace('/', "%2f");
        self.base
            .join(&path)
            .map_err(|_| UplinkError::InvalidUrl(format!("{}{}", self.base, name)))
    }

    fn fail_fast(&self) -> UplinkError {
        UplinkError::Unavailable {
            name: self.name().to_string(),
            reason: "circuit breaker open".to_string(),
        }
    }

    /// Conditionally fetches the manifest of `name`. Every version in a
    /// fresh manifest is annotated with this uplink's name for downstream
    /// URL rewriting.
    pub async fn fetch_manifest(&self, name: &str, options: FetchOptions) -> Result<FetchOutcome> {
        if !self.breaker.allows() {
            return Err(self.fail_fast());
        }

        let url = self.manifest_url(name)?;
        let mut request = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .timeout(self.config.timeout);
        if let Some(etag) = &options.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = tokio::select! {
            _ = options.signal.cancelled() => return Err(UplinkError::Cancelled),
            response = request.send() => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                self.breaker.record_failure();
                warn!(uplink = self.name(), package = name, error = %err, "manifest fetch failed");
                return Err(UplinkError::Http(err));
            }
        };

        match response.status() {
            StatusCode::NOT_MODIFIED => {
                self.breaker.record_success();
                debug!(uplink = self.name(), package = name, "manifest not modified");
                Ok(FetchOutcome::NotModified)
            }
            StatusCode::NOT_FOUND => {
                // the upstream answered; only transport problems count
                // against the breaker
                self.breaker.record_success();
                Err(UplinkError::NotFound)
            }
            status if status.is_success() => {
                let etag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|value| value.to_str().ok())
                    .map(String::from);

                let bytes = tokio::select! {
                    _ = options.signal.cancelled() => return Err(UplinkError::Cancelled),
                    bytes = response.bytes() => bytes,
                };
                let bytes = match bytes {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        self.breaker.record_failure();
                        return Err(UplinkError::Http(err));
                    }
                };
                self.breaker.record_success();

                let mut manifest = Manifest::from_json_slice(&bytes)
                    .map_err(|err| UplinkError::Malformed(err.to_string()))?;
                for version in manifest.versions.values_mut() {
                    version.origin = Some(self.name().to_string());
                }

                debug!(uplink = self.name(), package = name, "fetched manifest");
                Ok(FetchOutcome::Fresh(Box::new(RemoteManifest {
                    manifest,
                    etag,
                    fetched: wharf_model::time::epoch_millis(),
                })))
            }
            status => {
                self.breaker.record_failure();
                warn!(uplink = self.name(), package = name, status = %status, "unexpected upstream status");
                Err(UplinkError::Status(status.as_u16()))
            }
        }
    }

    /// Opens a tarball download. The returned stream verifies transfer
    /// length and honors the cancellation signal in `options`.
    pub async fn fetch_tarball(&self, url: &str, options: DownloadOptions) -> Result<DownloadStream> {
        if !self.breaker.allows() {
            return Err(self.fail_fast());
        }

        let url = Url::parse(url).map_err(|_| UplinkError::InvalidUrl(url.to_string()))?;
        let request = self.client.get(url.clone());

        let response = tokio::select! {
            _ = options.signal.cancelled() => return Err(UplinkError::Cancelled),
            response = request.send() => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                self.breaker.record_failure();
                warn!(uplink = self.name(), url = %url, error = %err, "tarball fetch failed");
                return Err(UplinkError::Http(err));
            }
        };

        match response.status() {
            StatusCode::NOT_FOUND => {
                self.breaker.record_success();
                Err(UplinkError::NotFound)
            }
            status if status.is_success() => {
                self.breaker.record_success();
                debug!(uplink = self.name(), url = %url, "streaming tarball");
                Ok(DownloadStream::new(response, options))
            }
            status => {
                self.breaker.record_failure();
                Err(UplinkError::Status(status.as_u16()))
            }
        }
    }
}
