//! Federated store: local store + uplink clients.
//!
//! Reads go through the local cache and, when the package's rule allows it,
//! fan out to the eligible uplinks; fresh remote manifests are merged into
//! the cache in uplink declaration order, so the first uplink to report a
//! version wins. Writes only ever touch the local store; uplinks are
//! read-only. Tarballs stream from local storage when present, otherwise
//! from the recorded upstream location, teeing into the cache when the
//! uplink is configured with `cache = true`.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::{future, Stream, StreamExt};
use serde_json::Value;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};
use url::Url;

use wharf_config::Config;
use wharf_model::{tarball_filename, validate_name, DistFile, Manifest, UplinkRecord, Version};
use wharf_storage::{StorageBackend, StorageError, TarballSink};
use wharf_uplink::{DownloadOptions, DownloadStream, FetchOptions, FetchOutcome, Uplink};
use wharf_utils::CancelToken;

use crate::error::{Result, StoreError};
use crate::local::LocalStore;
use crate::search::{search_local, SearchStream};
use crate::urls::{filename_from_url, local_dist_url};

/// Byte stream served for a tarball request.
pub type PackageStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Request-origin metadata used to rewrite dist URLs to this registry.
/// The caller identity rides along for the embedding layers; the engine
/// never interprets it.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub protocol: String,
    pub host: String,
    pub username: Option<String>,
}

#[derive(Clone, Default)]
pub struct GetOptions {
    /// Whether uplinks may be consulted for this request.
    pub uplinks_look: bool,
    pub request: Option<RequestContext>,
    pub signal: CancelToken,
}

pub struct FederatedStore {
    config: Arc<Config>,
    backend: Arc<dyn StorageBackend>,
    local: LocalStore,
    uplinks: Vec<Arc<Uplink>>,
}

impl FederatedStore {
    pub fn new(config: Config, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let uplinks = config
            .uplinks
            .iter()
            .map(|uplink| Uplink::new(uplink.clone()).map(Arc::new))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let local = LocalStore::new(backend.clone(), config.debug);
        Ok(FederatedStore {
            config: Arc::new(config),
            backend,
            local,
            uplinks,
        })
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    fn eligible_uplinks(&self, name: &str) -> Vec<&Arc<Uplink>> {
        let rule = self.config.rule_for(name);
        self.uplinks
            .iter()
            .filter(|uplink| rule.proxy.iter().any(|proxy| proxy == uplink.name()))
            .collect()
    }

    /// Refreshes the cached manifest from every eligible uplink. Fetches run
    /// concurrently; merges apply in uplink declaration order. Uplink errors
    /// are collected, never fatal while cached data or another uplink can
    /// answer.
    pub async fn sync_uplinks(
        &self,
        name: &str,
        cached: Option<Manifest>,
        options: &GetOptions,
    ) -> (Option<Manifest>, Vec<StoreError>) {
        if !options.uplinks_look || self.config.rule_for(name).is_private() {
            return (cached, Vec::new());
        }
        let eligible = self.eligible_uplinks(name);
        if eligible.is_empty() {
            return (cached, Vec::new());
        }

        let fetches = eligible.iter().map(|uplink| {
            let fetch_options = FetchOptions {
                etag: cached
                    .as_ref()
                    .and_then(|manifest| manifest.uplinks.get(uplink.name()))
                    .and_then(|record| record.etag.clone()),
                signal: options.signal.clone(),
            };
            async move { uplink.fetch_manifest(name, fetch_options).await }
        });
        let outcomes = future::join_all(fetches).await;

        let mut current = cached;
        let mut errors = Vec::new();

        for (uplink, outcome) in eligible.iter().zip(outcomes) {
            match outcome {
                Ok(FetchOutcome::Fresh(remote)) => {
                    let mut manifest = remote.manifest;
                    manifest.uplinks.insert(
                        uplink.name().to_string(),
                        UplinkRecord {
                            etag: remote.etag,
                            fetched: Some(remote.fetched),
                        },
                    );
                    match self
                        .local
                        .merge_remote_into_cache(name, &manifest, Some(uplink.base_url()))
                        .await
                    {
                        Ok(merged) => current = Some(merged),
                        Err(err) => {
                            warn!(package = name, uplink = uplink.name(), error = %err, "cache merge failed");
                            errors.push(err);
                        }
                    }
                }
                Ok(FetchOutcome::NotModified) => {
                    debug!(package = name, uplink = uplink.name(), "cache still valid");
                }
                Err(err) => {
                    debug!(package = name, uplink = uplink.name(), error = %err, "uplink fetch failed");
                    errors.push(err.into());
                }
            }
        }

        (current, errors)
    }

    /// Reads the merged manifest, consulting uplinks per `options`. The
    /// second element carries non-fatal uplink errors.
    pub async fn get_package(
        &self,
        name: &str,
        options: &GetOptions,
    ) -> Result<(Manifest, Vec<StoreError>)> {
        validate_name(name)?;
        let cached = match self.local.get_manifest(name).await {
            Ok(manifest) => Some(manifest),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };

        let (merged, errors) = self.sync_uplinks(name, cached, options).await;
        match merged {
            Some(manifest) => Ok((manifest, errors)),
            None => Err(StoreError::package_not_found()),
        }
    }

    /// The manifest as served to clients: every dist URL rewritten to point
    /// at this registry.
    pub async fn get_package_manifest(
        &self,
        name: &str,
        options: &GetOptions,
    ) -> Result<(Manifest, Vec<StoreError>)> {
        let (mut manifest, errors) = self.get_package(name, options).await?;
        if let Some(request) = &options.request {
            rewrite_dist_urls(&mut manifest, request, &self.config.url_prefix);
        }
        Ok((manifest, errors))
    }

    /// Resolves `target` as a literal version first, then as a dist-tag.
    pub async fn get_package_by_version(
        &self,
        name: &str,
        target: &str,
        options: &GetOptions,
    ) -> Result<Version> {
        let (manifest, _) = self.get_package_manifest(name, options).await?;
        manifest
            .resolve_version(target)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("version {target} not found")))
    }

    async fn lookup_distfile(&self, name: &str, filename: &str) -> Result<Option<DistFile>> {
        match self.local.get_manifest(name).await {
            Ok(manifest) => Ok(manifest.distfiles.get(filename).cloned()),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn uplink_for_distfile(&self, name: &str, distfile: &DistFile) -> Option<&Arc<Uplink>> {
        let eligible = self.eligible_uplinks(name);

        if let Some(registry) = &distfile.registry {
            if let Some(uplink) = eligible.iter().find(|uplink| uplink.name() == registry) {
                return Some(*uplink);
            }
        }

        let host = Url::parse(&distfile.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string));
        if let Some(host) = host {
            if let Some(uplink) = eligible
                .iter()
                .find(|uplink| uplink.base_url().host_str() == Some(host.as_str()))
            {
                return Some(*uplink);
            }
        }

        eligible.into_iter().next()
    }

    /// Streams a tarball: local bytes when cached, otherwise the recorded
    /// upstream location, forcing an uplink sync when the pointer is not
    /// cached yet. Uplinks configured with `cache = true` tee the download
    /// into local storage through an atomic write.
    pub async fn get_tarball(
        &self,
        name: &str,
        filename: &str,
        signal: CancelToken,
    ) -> Result<PackageStream> {
        validate_name(name)?;

        match self.backend.open_tarball_read(name, filename).await {
            Ok(stream) => {
                return Ok(Box::pin(stream.map(|item| item.map_err(StoreError::from))));
            }
            Err(StorageError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }

        let distfile = match self.lookup_distfile(name, filename).await? {
            Some(distfile) => distfile,
            None => {
                // pointer not cached yet: force a sync and retry
                let options = GetOptions {
                    uplinks_look: true,
                    request: None,
                    signal: signal.clone(),
                };
                let cached = match self.local.get_manifest(name).await {
                    Ok(manifest) => Some(manifest),
                    Err(err) if err.is_not_found() => None,
                    Err(err) => return Err(err),
                };
                let _ = self.sync_uplinks(name, cached, &options).await;
                match self.lookup_distfile(name, filename).await? {
                    Some(distfile) => distfile,
                    None => {
                        return Err(StoreError::NotFound(format!(
                            "no such file {filename}"
                        )))
                    }
                }
            }
        };

        let uplink = self.uplink_for_distfile(name, &distfile).ok_or_else(|| {
            StoreError::Unavailable(format!("no uplink configured for {}", distfile.url))
        })?;

        let download = uplink
            .fetch_tarball(
                &distfile.url,
                DownloadOptions {
                    signal: signal.clone(),
                    progress: None,
                },
            )
            .await?;

        if uplink.caches_tarballs() {
            match self.backend.open_tarball_write(name, filename, signal).await {
                Ok(sink) => return Ok(tee_into_cache(download, sink)),
                Err(err) => {
                    warn!(package = name, filename, error = %err, "cache write unavailable, serving pass-through");
                }
            }
        }
        Ok(Box::pin(download.map(|item| item.map_err(StoreError::from))))
    }

    /// Opens a writable tarball for a publish. The returned sink hashes the
    /// bytes and stamps the attachment shasum on commit; the publish
    /// transaction is completed by `add_version`.
    pub async fn add_tarball(
        &self,
        name: &str,
        filename: &str,
        signal: CancelToken,
    ) -> Result<PublishSink> {
        validate_name(name)?;
        let inner = self
            .backend
            .open_tarball_write(name, filename, signal)
            .await?;
        Ok(PublishSink {
            inner: Some(inner),
            hasher: Sha1::new(),
            local: self.local.clone(),
            name: name.to_string(),
            filename: filename.to_string(),
        })
    }

    pub async fn add_version(
        &self,
        name: &str,
        version: &str,
        metadata: Version,
        tag: &str,
    ) -> Result<Manifest> {
        self.local.add_version(name, version, metadata, tag).await
    }

    pub async fn change_package(&self, name: &str, incoming: Value) -> Result<Manifest> {
        self.local.change_package(name, incoming).await
    }

    pub async fn merge_tags(
        &self,
        name: &str,
        tags: &std::collections::BTreeMap<String, Option<String>>,
    ) -> Result<Manifest> {
        self.local.merge_tags(name, tags).await
    }

    pub async fn remove_tarball(&self, name: &str, filename: &str, rev: &str) -> Result<Manifest> {
        self.local.remove_tarball(name, filename, rev).await
    }

    pub async fn remove_package(&self, name: &str) -> Result<()> {
        self.local.remove_package(name).await
    }

    /// Searches local packages, enriching each hit with its manifest
    /// projection. Results stream as fast as the consumer reads. Uplink
    /// search fan-out is not wired up; local hits answer the query.
    pub async fn search(&self, query: &str) -> Result<SearchStream> {
        search_local(self.backend.clone(), self.local.clone(), query).await
    }
}

/// A publish upload in flight. Dropping the sink before `commit` discards
/// the bytes.
pub struct PublishSink {
    inner: Option<Box<dyn TarballSink>>,
    hasher: Sha1,
    local: LocalStore,
    name: String,
    filename: String,
}

impl PublishSink {
    pub async fn write(&mut self, chunk: Bytes) -> Result<()> {
        let sink = self.inner.as_mut().ok_or(StoreError::Cancelled)?;
        self.hasher.update(&chunk);
        sink.write(chunk).await.map_err(Into::into)
    }

    /// Publishes the blob and stamps its SHA-1 into the manifest's
    /// attachment record. Returns the shasum.
    pub async fn commit(mut self) -> Result<String> {
        let sink = self.inner.take().ok_or(StoreError::Cancelled)?;
        sink.commit().await?;

        let shasum = hex::encode(self.hasher.finalize());
        self.local
            .stamp_attachment(&self.name, &self.filename, &shasum)
            .await?;
        debug!(package = %self.name, filename = %self.filename, shasum = %shasum, "tarball uploaded");
        Ok(shasum)
    }

    pub async fn abort(mut self) -> Result<()> {
        if let Some(sink) = self.inner.take() {
            sink.abort().await?;
        }
        Ok(())
    }
}

fn rewrite_dist_urls(manifest: &mut Manifest, request: &RequestContext, url_prefix: &str) {
    let name = manifest.name.clone();
    for (version, record) in manifest.versions.iter_mut() {
        let filename = record
            .dist
            .tarball
            .as_deref()
            .and_then(filename_from_url)
            .unwrap_or_else(|| tarball_filename(&name, version));
        record.dist.tarball = Some(local_dist_url(
            &request.protocol,
            &request.host,
            url_prefix,
            &name,
            &filename,
        ));
    }
}

enum TeeState {
    Running {
        download: DownloadStream,
        sink: Option<Box<dyn TarballSink>>,
    },
    Done,
}

/// Forwards the download to the caller while writing it into the cache
/// sink. Cache failures degrade to pass-through; a download error or
/// cancellation rolls the pending cache write back.
fn tee_into_cache(download: DownloadStream, sink: Box<dyn TarballSink>) -> PackageStream {
    let stream = futures::stream::unfold(
        TeeState::Running {
            download,
            sink: Some(sink),
        },
        |state| async move {
            let TeeState::Running {
                mut download,
                mut sink,
            } = state
            else {
                return None;
            };

            match download.next().await {
                Some(Ok(chunk)) => {
                    if let Some(active) = sink.as_mut() {
                        if let Err(err) = active.write(chunk.clone()).await {
                            warn!(error = %err, "tarball cache write failed, serving pass-through");
                            if let Some(active) = sink.take() {
                                let _ = active.abort().await;
                            }
                        }
                    }
                    Some((Ok(chunk), TeeState::Running { download, sink }))
                }
                Some(Err(err)) => {
                    if let Some(active) = sink.take() {
                        let _ = active.abort().await;
                    }
                    Some((Err(err.into()), TeeState::Done))
                }
                None => {
                    if let Some(active) = sink.take() {
                        match active.commit().await {
                            Ok(()) => debug!("tarball cached"),
                            Err(err) => warn!(error = %err, "tarball cache commit failed"),
                        }
                    }
                    None
                }
            }
        },
    );
    Box::pin(stream)
}
