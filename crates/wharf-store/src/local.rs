//! Local store: domain semantics over a storage backend.
//!
//! The local store owns manifest lifecycle and invariants. Every mutation
//! funnels through the backend's serialized `update_manifest`, finishes with
//! a revision bump (unless debug mode froze revisions), and leaves the
//! manifest satisfying the structural invariants checked by
//! [`Manifest::check_integrity`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use wharf_model::time::iso_now;
use wharf_model::{
    bump_revision, compare_versions, validate_name, DistFile, Manifest, Version,
};
use wharf_storage::{StorageBackend, StorageError, Transform};

use crate::error::{Result, StoreError};
use crate::urls::{align_protocol, filename_from_url};

#[derive(Clone)]
pub struct LocalStore {
    backend: Arc<dyn StorageBackend>,
    debug: bool,
}

impl LocalStore {
    pub fn new(backend: Arc<dyn StorageBackend>, debug: bool) -> Self {
        LocalStore { backend, debug }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Stamps the next revision token. Debug mode leaves revisions frozen so
    /// fixtures stay reproducible.
    fn finish(&self, manifest: &mut Manifest) {
        if !self.debug {
            manifest.rev = bump_revision(&manifest.rev);
        }
    }

    /// Reads a package manifest. The typed decode already filled every
    /// optional container and stripped `__proto__` keys.
    pub async fn get_manifest(&self, name: &str) -> Result<Manifest> {
        validate_name(name)?;
        Ok(self.backend.read_manifest(name).await?)
    }

    /// Like [`get_manifest`](Self::get_manifest), but synthesizes an empty
    /// template for unknown packages. Nothing is written.
    pub async fn read_or_create(&self, name: &str) -> Result<Manifest> {
        match self.get_manifest(name).await {
            Ok(manifest) => Ok(manifest),
            Err(err) if err.is_not_found() => Ok(Manifest::template(name)),
            Err(err) => Err(err),
        }
    }

    /// Serialized read-modify-write with typed domain errors. With `create`
    /// set, a missing package starts from the empty template; the create
    /// race against a concurrent writer is retried through the update path.
    async fn update_manifest_with<F>(&self, name: &str, create: bool, mut apply: F) -> Result<Manifest>
    where
        F: FnMut(&mut Manifest) -> Result<()> + Send,
    {
        loop {
            let mut domain_err: Option<StoreError> = None;
            let outcome = {
                let transform: Transform<'_> = Box::new(|mut manifest| {
                    match apply(&mut manifest) {
                        Ok(()) => {
                            self.finish(&mut manifest);
                            Ok(manifest)
                        }
                        Err(err) => {
                            // sentinel error; the domain error is recovered
                            // from `domain_err` below
                            domain_err = Some(err);
                            Err(StorageError::Conflict)
                        }
                    }
                });
                self.backend.update_manifest(name, transform).await
            };

            match outcome {
                Ok(manifest) => return Ok(manifest),
                Err(_) if domain_err.is_some() => {
                    return Err(domain_err.take().expect("domain error set"))
                }
                Err(StorageError::NotFound) if create => {
                    let mut manifest = Manifest::template(name);
                    apply(&mut manifest)?;
                    self.finish(&mut manifest);
                    match self.backend.create_manifest(name, &manifest).await {
                        Ok(()) => return Ok(manifest),
                        Err(StorageError::Conflict) => continue,
                        Err(err) => return Err(err.into()),
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Publishes one version. The version record's readme is hoisted into
    /// the manifest, contributors are normalized, the tarball attachment is
    /// cross-checked against the announced shasum, and the dist-tag applied.
    pub async fn add_version(
        &self,
        name: &str,
        version: &str,
        metadata: Version,
        tag: &str,
    ) -> Result<Manifest> {
        validate_name(name)?;
        let manifest = self
            .update_manifest_with(name, true, |m| apply_add_version(m, version, &metadata, tag))
            .await?;
        self.backend.add_package(name).await?;
        info!(package = name, version, tag, "published version");
        Ok(manifest)
    }

    /// Applies an incoming manifest as an unpublish-of-versions and
    /// deprecation change: versions absent from `incoming` are removed,
    /// deprecation flags are synchronized, `users` and `dist-tags` are
    /// replaced wholesale.
    pub async fn change_package(&self, name: &str, incoming: Value) -> Result<Manifest> {
        validate_name(name)?;
        if !incoming.get("versions").is_some_and(Value::is_object)
            || !incoming.get("dist-tags").is_some_and(Value::is_object)
        {
            return Err(StoreError::BadData(
                "versions and dist-tags must be objects".to_string(),
            ));
        }
        let incoming = Manifest::from_json_value(incoming)?;

        self.update_manifest_with(name, false, |m| apply_change_package(m, &incoming))
            .await
    }

    /// Applies a set of dist-tag changes. `None` deletes a tag; assignments
    /// must point at existing versions.
    pub async fn merge_tags(
        &self,
        name: &str,
        tags: &BTreeMap<String, Option<String>>,
    ) -> Result<Manifest> {
        validate_name(name)?;
        self.update_manifest_with(name, false, |m| {
            for (tag, target) in tags {
                match target {
                    None => {
                        m.dist_tags.remove(tag);
                        debug!(package = name, tag, "removed dist-tag");
                    }
                    Some(version) => {
                        if !m.versions.contains_key(version) {
                            return Err(StoreError::NotFound(format!(
                                "version {version} does not exist"
                            )));
                        }
                        m.dist_tags.insert(tag.clone(), version.clone());
                    }
                }
            }
            m.time.insert("modified".to_string(), iso_now());
            Ok(())
        })
        .await
    }

    /// Removes a tarball attachment. The manifest is updated first; a
    /// failure to delete the blob afterwards leaves the manifest consistent,
    /// so it is logged rather than surfaced.
    pub async fn remove_tarball(&self, name: &str, filename: &str, _rev: &str) -> Result<Manifest> {
        validate_name(name)?;
        let manifest = self
            .update_manifest_with(name, false, |m| {
                if m.attachments.remove(filename).is_none() {
                    return Err(StoreError::NotFound("no such file available".to_string()));
                }
                m.time.insert("modified".to_string(), iso_now());
                Ok(())
            })
            .await?;

        if let Err(err) = self.backend.delete_tarball(name, filename).await {
            warn!(package = name, filename, error = %err, "tarball blob deletion failed");
        }
        Ok(manifest)
    }

    /// Destroys a package: every attachment blob, then the manifest and the
    /// package directory, then the index entry.
    pub async fn remove_package(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let manifest = match self.backend.read_manifest(name).await {
            Ok(manifest) => manifest,
            Err(StorageError::NotFound) => return Err(StoreError::package_not_found()),
            Err(err) => return Err(err.into()),
        };

        for filename in manifest.attachments.keys() {
            match self.backend.delete_tarball(name, filename).await {
                Ok(()) | Err(StorageError::NotFound) => {}
                Err(err) => {
                    return Err(StoreError::BadData(format!(
                        "failed to delete attachment {filename}: {err}"
                    )))
                }
            }
        }

        self.backend
            .remove_package(name)
            .await
            .map_err(|err| StoreError::BadData(err.to_string()))?;
        info!(package = name, "removed package");
        Ok(())
    }

    /// Records an uploaded tarball's shasum on its attachment entry,
    /// creating the package from the template when the upload precedes the
    /// first version.
    pub(crate) async fn stamp_attachment(
        &self,
        name: &str,
        filename: &str,
        shasum: &str,
    ) -> Result<Manifest> {
        self.update_manifest_with(name, true, |m| {
            let attachment = m.attachments.entry(filename.to_string()).or_default();
            attachment.shasum = Some(shasum.to_string());
            Ok(())
        })
        .await
    }

    /// Merges a manifest fetched from an uplink into the local cache.
    /// Returns the cached manifest unchanged when the merge is a no-op;
    /// otherwise writes exactly once. Versions already cached are never
    /// overwritten, so the first uplink to report a version wins.
    pub async fn merge_remote_into_cache(
        &self,
        name: &str,
        remote: &Manifest,
        uplink_url: Option<&Url>,
    ) -> Result<Manifest> {
        validate_name(name)?;

        match self.backend.read_manifest(name).await {
            Ok(current) => {
                let (_, dirty) = merge_manifests(current.clone(), remote, uplink_url);
                if !dirty {
                    return Ok(current);
                }
            }
            Err(StorageError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }

        let merged = self
            .update_manifest_with(name, true, |m| {
                let (next, _) = merge_manifests(std::mem::take(m), remote, uplink_url);
                *m = next;
                Ok(())
            })
            .await?;
        debug!(package = name, "merged remote manifest into cache");
        Ok(merged)
    }
}

fn apply_add_version(
    manifest: &mut Manifest,
    version: &str,
    metadata: &Version,
    tag: &str,
) -> Result<()> {
    if manifest.versions.contains_key(version) {
        return Err(StoreError::Conflict(format!(
            "version {version} already exists"
        )));
    }

    let mut record = metadata.clone();
    // one readme per package: it lives on the manifest, not the version
    if let Some(readme) = record.readme.take() {
        manifest.readme = Some(readme);
    }
    record.normalize_contributors();

    if let Some(tarball_url) = record.dist.tarball.clone() {
        if let Some(filename) = filename_from_url(&tarball_url) {
            let attachment = manifest.attachments.entry(filename).or_default();
            if let (Some(existing), Some(announced)) = (&attachment.shasum, &record.dist.shasum) {
                if existing != announced {
                    return Err(StoreError::BadRequest(format!(
                        "shasum mismatch for {tarball_url}: uploaded {existing}, announced {announced}"
                    )));
                }
            }
            if attachment.shasum.is_none() {
                attachment.shasum = record.dist.shasum.clone();
            }
            attachment.version = Some(version.to_string());
        }
    }

    let now = iso_now();
    manifest
        .time
        .entry("created".to_string())
        .or_insert_with(|| now.clone());
    manifest.time.insert(version.to_string(), now.clone());
    manifest.time.insert("modified".to_string(), now);

    manifest.versions.insert(version.to_string(), record);
    tag_version(manifest, tag, version);
    Ok(())
}

/// Points `tag` at `version`. A manifest that ends up without a `latest`
/// tag gets one pointing at its greatest version under semver ordering.
fn tag_version(manifest: &mut Manifest, tag: &str, version: &str) {
    manifest
        .dist_tags
        .insert(tag.to_string(), version.to_string());

    if !manifest.dist_tags.contains_key("latest") {
        let greatest = manifest
            .versions
            .keys()
            .max_by(|a, b| compare_versions(a, b))
            .cloned();
        if let Some(greatest) = greatest {
            manifest.dist_tags.insert("latest".to_string(), greatest);
        }
    }
}

fn apply_change_package(manifest: &mut Manifest, incoming: &Manifest) -> Result<()> {
    let removed: Vec<String> = manifest
        .versions
        .keys()
        .filter(|version| !incoming.versions.contains_key(*version))
        .cloned()
        .collect();
    for version in &removed {
        manifest.versions.remove(version);
        manifest.time.remove(version);
        for attachment in manifest.attachments.values_mut() {
            if attachment.version.as_deref() == Some(version.as_str()) {
                attachment.version = None;
            }
        }
        info!(package = %manifest.name, version, "unpublished version");
    }

    for (version, local_record) in manifest.versions.iter_mut() {
        let Some(incoming_record) = incoming.versions.get(version) else {
            continue;
        };
        // an empty string clears the deprecation flag
        let effective = match &incoming_record.deprecated {
            Some(message) if message.is_empty() => None,
            other => other.clone(),
        };
        if effective != local_record.deprecated {
            local_record.deprecated = effective;
        }
    }

    manifest.users = incoming.users.clone();
    manifest.dist_tags = incoming.dist_tags.clone();
    // dist-tag closure: drop tags the incoming document left dangling
    manifest
        .dist_tags
        .retain(|_, target| manifest.versions.contains_key(target));

    manifest.time.insert("modified".to_string(), iso_now());
    Ok(())
}

/// Merges `remote` into `local`, returning the result and whether anything
/// changed. Existing versions and distfile shasums are never overwritten.
fn merge_manifests(
    mut local: Manifest,
    remote: &Manifest,
    uplink_url: Option<&Url>,
) -> (Manifest, bool) {
    let mut dirty = false;

    if remote.readme.is_some() && remote.readme != local.readme {
        local.readme = remote.readme.clone();
        dirty = true;
    }

    for (version, record) in &remote.versions {
        if local.versions.contains_key(version) {
            continue;
        }
        let mut record = record.clone();
        record.readme = None;
        record.normalize_contributors();

        if let Some(tarball_url) = record.dist.tarball.clone() {
            if let Some(filename) = filename_from_url(&tarball_url) {
                if !local.distfiles.contains_key(&filename) {
                    let url = match (&record.origin, uplink_url) {
                        (Some(_), Some(uplink_url)) => align_protocol(&tarball_url, uplink_url),
                        _ => tarball_url.clone(),
                    };
                    local.distfiles.insert(
                        filename,
                        DistFile {
                            url,
                            sha: record.dist.shasum.clone().unwrap_or_default(),
                            registry: record.origin.clone(),
                        },
                    );
                }
            }
        }

        local.versions.insert(version.clone(), record);
        dirty = true;
    }

    for (tag, target) in &remote.dist_tags {
        if local.dist_tags.get(tag) != Some(target) && local.versions.contains_key(target) {
            local.dist_tags.insert(tag.clone(), target.clone());
            dirty = true;
        }
    }

    for (uplink, record) in &remote.uplinks {
        if local.uplinks.get(uplink) != Some(record) {
            local.uplinks.insert(uplink.clone(), record.clone());
            dirty = true;
        }
    }

    if !remote.time.is_empty() && remote.time != local.time {
        local.time = remote.time.clone();
        dirty = true;
    }

    (local, dirty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wharf_model::{Attachment, UplinkRecord};
    use wharf_storage::FsBackend;

    async fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FsBackend::open(dir.path()).await.unwrap());
        (dir, LocalStore::new(backend, false))
    }

    fn version(name: &str, version: &str) -> Version {
        serde_json::from_value(json!({
            "name": name,
            "version": version,
            "description": format!("{name} v{version}"),
            "readme": "# readme",
            "dist": {
                "tarball": format!("http://localhost:4873/{name}/-/{name}-{version}.tgz"),
                "shasum": "aaaa0000aaaa0000aaaa0000aaaa0000aaaa0000"
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_publish_and_get_round_trip() {
        let (_dir, store) = store().await;
        store
            .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
            .await
            .unwrap();

        let manifest = store.get_manifest("foo").await.unwrap();
        assert_eq!(manifest.dist_tags.get("latest").unwrap(), "1.0.0");
        assert!(manifest.rev.starts_with("1-"));
        assert!(manifest.time.contains_key("created"));
        assert!(manifest.time.contains_key("modified"));
        assert!(manifest.time.contains_key("1.0.0"));
        // readme hoisted off the version record
        assert_eq!(manifest.readme.as_deref(), Some("# readme"));
        assert!(manifest.versions.get("1.0.0").unwrap().readme.is_none());
        manifest.check_integrity().unwrap();

        assert_eq!(
            store.backend().list_packages().await.unwrap(),
            vec!["foo".to_string()]
        );
    }

    #[tokio::test]
    async fn test_republish_conflicts() {
        let (_dir, store) = store().await;
        store
            .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
            .await
            .unwrap();
        let err = store
            .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_concurrent_publish_one_wins() {
        let (_dir, store) = store().await;
        let store = Arc::new(store);

        let a = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
                    .await
            })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
                    .await
            })
        };

        let outcomes = [a.await.unwrap(), b.await.unwrap()];
        let successes = outcomes.iter().filter(|o| o.is_ok()).count();
        let conflicts = outcomes
            .iter()
            .filter(|o| matches!(o, Err(StoreError::Conflict(_))))
            .count();
        assert_eq!((successes, conflicts), (1, 1));
    }

    #[tokio::test]
    async fn test_tagged_publish_keeps_latest() {
        let (_dir, store) = store().await;
        store
            .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
            .await
            .unwrap();
        let manifest = store
            .add_version("foo", "2.0.0-beta.1", version("foo", "2.0.0-beta.1"), "beta")
            .await
            .unwrap();

        assert_eq!(manifest.dist_tags.get("latest").unwrap(), "1.0.0");
        assert_eq!(manifest.dist_tags.get("beta").unwrap(), "2.0.0-beta.1");
        manifest.check_integrity().unwrap();
    }

    #[tokio::test]
    async fn test_missing_latest_points_at_greatest_version() {
        let (_dir, store) = store().await;
        store
            .add_version("foo", "1.10.0", version("foo", "1.10.0"), "next")
            .await
            .unwrap();
        let manifest = store.get_manifest("foo").await.unwrap();
        // a publish without any latest promotes the greatest semver
        assert_eq!(manifest.dist_tags.get("latest").unwrap(), "1.10.0");
    }

    #[tokio::test]
    async fn test_shasum_guard_rejects_mismatch() {
        let (_dir, store) = store().await;
        let mut manifest = Manifest::template("foo");
        manifest.attachments.insert(
            "foo-1.0.0.tgz".to_string(),
            Attachment {
                shasum: Some("bbbb1111bbbb1111bbbb1111bbbb1111bbbb1111".to_string()),
                version: None,
            },
        );
        store.backend().write_manifest("foo", &manifest).await.unwrap();

        let err = store
            .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_shasum_guard_accepts_when_attachment_has_none() {
        let (_dir, store) = store().await;
        let mut manifest = Manifest::template("foo");
        manifest
            .attachments
            .insert("foo-1.0.0.tgz".to_string(), Attachment::default());
        store.backend().write_manifest("foo", &manifest).await.unwrap();

        let manifest = store
            .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
            .await
            .unwrap();
        let attachment = manifest.attachments.get("foo-1.0.0.tgz").unwrap();
        assert_eq!(
            attachment.shasum.as_deref(),
            Some("aaaa0000aaaa0000aaaa0000aaaa0000aaaa0000")
        );
        assert_eq!(attachment.version.as_deref(), Some("1.0.0"));
    }

    #[tokio::test]
    async fn test_change_package_unpublishes_and_deprecates() {
        let (_dir, store) = store().await;
        store
            .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
            .await
            .unwrap();
        store
            .add_version("foo", "1.1.0", version("foo", "1.1.0"), "latest")
            .await
            .unwrap();

        let current = store.get_manifest("foo").await.unwrap();
        let mut incoming = serde_json::to_value(&current).unwrap();
        incoming["versions"].as_object_mut().unwrap().remove("1.1.0");
        incoming["versions"]["1.0.0"]["deprecated"] = json!("use something else");
        incoming["dist-tags"] = json!({"latest": "1.0.0"});

        let manifest = store.change_package("foo", incoming).await.unwrap();
        assert!(!manifest.versions.contains_key("1.1.0"));
        assert!(!manifest.time.contains_key("1.1.0"));
        assert_eq!(
            manifest.versions.get("1.0.0").unwrap().deprecated.as_deref(),
            Some("use something else")
        );
        assert_eq!(manifest.dist_tags.get("latest").unwrap(), "1.0.0");
        manifest.check_integrity().unwrap();

        // an empty string clears the deprecation flag again
        let mut incoming = serde_json::to_value(&manifest).unwrap();
        incoming["versions"]["1.0.0"]["deprecated"] = json!("");
        let manifest = store.change_package("foo", incoming).await.unwrap();
        assert!(manifest.versions.get("1.0.0").unwrap().deprecated.is_none());
    }

    #[tokio::test]
    async fn test_change_package_rejects_bad_shapes() {
        let (_dir, store) = store().await;
        store
            .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
            .await
            .unwrap();

        let err = store
            .change_package("foo", json!({"name": "foo", "versions": "nope"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BadData(_)));
    }

    #[tokio::test]
    async fn test_merge_tags() {
        let (_dir, store) = store().await;
        store
            .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
            .await
            .unwrap();

        let mut tags = BTreeMap::new();
        tags.insert("beta".to_string(), Some("1.0.0".to_string()));
        let manifest = store.merge_tags("foo", &tags).await.unwrap();
        assert_eq!(manifest.dist_tags.get("beta").unwrap(), "1.0.0");

        let mut tags = BTreeMap::new();
        tags.insert("beta".to_string(), None);
        let manifest = store.merge_tags("foo", &tags).await.unwrap();
        assert!(!manifest.dist_tags.contains_key("beta"));

        let mut tags = BTreeMap::new();
        tags.insert("beta".to_string(), Some("9.9.9".to_string()));
        let err = store.merge_tags("foo", &tags).await.unwrap_err();
        let StoreError::NotFound(message) = err else {
            panic!("expected not-found");
        };
        assert!(message.contains("does not exist"));
    }

    #[tokio::test]
    async fn test_versions_survive_tag_churn() {
        let (_dir, store) = store().await;
        store
            .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
            .await
            .unwrap();

        for round in 0..5 {
            let tag = format!("tag-{round}");
            let mut tags = BTreeMap::new();
            tags.insert(tag.clone(), Some("1.0.0".to_string()));
            store.merge_tags("foo", &tags).await.unwrap();
            let mut tags = BTreeMap::new();
            tags.insert(tag, None);
            store.merge_tags("foo", &tags).await.unwrap();
        }

        let manifest = store.get_manifest("foo").await.unwrap();
        assert!(manifest.versions.contains_key("1.0.0"));
    }

    #[tokio::test]
    async fn test_revision_strictly_increases() {
        let (_dir, store) = store().await;
        store
            .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
            .await
            .unwrap();
        let first = store.get_manifest("foo").await.unwrap().rev;

        let mut tags = BTreeMap::new();
        tags.insert("beta".to_string(), Some("1.0.0".to_string()));
        store.merge_tags("foo", &tags).await.unwrap();
        let second = store.get_manifest("foo").await.unwrap().rev;

        let counter = |rev: &str| rev.split('-').next().unwrap().parse::<u64>().unwrap();
        assert!(counter(&second) > counter(&first));
    }

    #[tokio::test]
    async fn test_debug_mode_freezes_revisions() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FsBackend::open(dir.path()).await.unwrap());
        let store = LocalStore::new(backend, true);

        store
            .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
            .await
            .unwrap();
        let manifest = store.get_manifest("foo").await.unwrap();
        assert_eq!(manifest.rev, "0-0000000000000000");
    }

    #[tokio::test]
    async fn test_remove_tarball_updates_manifest_first() {
        let (_dir, store) = store().await;
        let manifest = store
            .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
            .await
            .unwrap();
        assert!(manifest.attachments.contains_key("foo-1.0.0.tgz"));

        // blob was never written; deletion failure must not surface
        let manifest = store
            .remove_tarball("foo", "foo-1.0.0.tgz", &manifest.rev)
            .await
            .unwrap();
        assert!(!manifest.attachments.contains_key("foo-1.0.0.tgz"));

        let err = store
            .remove_tarball("foo", "foo-1.0.0.tgz", &manifest.rev)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_remove_package_destroys_everything() {
        let (dir, store) = store().await;
        store
            .add_version("foo", "1.0.0", version("foo", "1.0.0"), "latest")
            .await
            .unwrap();

        store.remove_package("foo").await.unwrap();
        assert!(store.get_manifest("foo").await.unwrap_err().is_not_found());
        assert!(!dir.path().join("foo").exists());
        assert!(store.backend().list_packages().await.unwrap().is_empty());

        let err = store.remove_package("foo").await.unwrap_err();
        assert!(err.is_not_found());
    }

    fn remote_manifest() -> Manifest {
        let mut manifest = Manifest::from_json_value(json!({
            "name": "react",
            "dist-tags": {"latest": "18.2.0"},
            "time": {
                "created": "2022-06-14T00:00:00.000Z",
                "modified": "2022-06-14T00:00:00.000Z",
                "18.2.0": "2022-06-14T00:00:00.000Z"
            },
            "readme": "# React",
            "versions": {
                "18.2.0": {
                    "name": "react",
                    "version": "18.2.0",
                    "readme": "# React",
                    "contributors": "Someone <someone@example.com>",
                    "dist": {
                        "tarball": "http://registry.npmjs.org/react/-/react-18.2.0.tgz",
                        "shasum": "555ab1a9b4ea292a67e5d40869b5d91e9cbf0bce"
                    }
                }
            }
        }))
        .unwrap();
        for record in manifest.versions.values_mut() {
            record.origin = Some("npmjs".to_string());
        }
        manifest.uplinks.insert(
            "npmjs".to_string(),
            UplinkRecord {
                etag: Some("\"etag-1\"".to_string()),
                fetched: Some(1_750_000_000_000),
            },
        );
        manifest
    }

    #[tokio::test]
    async fn test_merge_remote_creates_cache() {
        let (_dir, store) = store().await;
        let uplink_url = Url::parse("https://registry.npmjs.org/").unwrap();

        let merged = store
            .merge_remote_into_cache("react", &remote_manifest(), Some(&uplink_url))
            .await
            .unwrap();

        assert!(merged.versions.contains_key("18.2.0"));
        // version readme stripped, manifest readme adopted
        assert_eq!(merged.readme.as_deref(), Some("# React"));
        assert!(merged.versions.get("18.2.0").unwrap().readme.is_none());

        let distfile = merged.distfiles.get("react-18.2.0.tgz").unwrap();
        // protocol aligned with the configured https uplink
        assert_eq!(
            distfile.url,
            "https://registry.npmjs.org/react/-/react-18.2.0.tgz"
        );
        assert_eq!(distfile.sha, "555ab1a9b4ea292a67e5d40869b5d91e9cbf0bce");
        assert_eq!(distfile.registry.as_deref(), Some("npmjs"));

        let record = merged.uplinks.get("npmjs").unwrap();
        assert_eq!(record.etag.as_deref(), Some("\"etag-1\""));

        // proxy caches are not registered as local packages
        assert!(store.backend().list_packages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_remote_is_idempotent() {
        let (_dir, store) = store().await;
        let uplink_url = Url::parse("https://registry.npmjs.org/").unwrap();
        let remote = remote_manifest();

        let first = store
            .merge_remote_into_cache("react", &remote, Some(&uplink_url))
            .await
            .unwrap();
        let second = store
            .merge_remote_into_cache("react", &remote, Some(&uplink_url))
            .await
            .unwrap();

        // no-op merge returns the cached manifest without a new revision
        assert_eq!(first.rev, second.rev);
    }

    #[tokio::test]
    async fn test_merge_first_uplink_wins() {
        let (_dir, store) = store().await;
        let remote_a = remote_manifest();

        let mut remote_b = remote_manifest();
        remote_b
            .versions
            .get_mut("18.2.0")
            .unwrap()
            .description = Some("imposter".to_string());

        store
            .merge_remote_into_cache("react", &remote_a, None)
            .await
            .unwrap();
        let merged = store
            .merge_remote_into_cache("react", &remote_b, None)
            .await
            .unwrap();

        assert!(merged.versions.get("18.2.0").unwrap().description.is_none());
    }

    #[tokio::test]
    async fn test_merge_keeps_existing_distfile_sha() {
        let (_dir, store) = store().await;
        store
            .merge_remote_into_cache("react", &remote_manifest(), None)
            .await
            .unwrap();

        let mut conflicting = remote_manifest();
        conflicting.versions.insert(
            "18.3.0".to_string(),
            serde_json::from_value(json!({
                "name": "react",
                "version": "18.3.0",
                "dist": {
                    // same filename as the cached 18.2.0 entry, different sha
                    "tarball": "http://registry.npmjs.org/react/-/react-18.2.0.tgz",
                    "shasum": "0000000000000000000000000000000000000000"
                }
            }))
            .unwrap(),
        );

        let merged = store
            .merge_remote_into_cache("react", &conflicting, None)
            .await
            .unwrap();
        assert_eq!(
            merged.distfiles.get("react-18.2.0.tgz").unwrap().sha,
            "555ab1a9b4ea292a67e5d40869b5d91e9cbf0bce"
        );
    }

    #[tokio::test]
    async fn test_read_or_create_synthesizes_template() {
        let (_dir, store) = store().await;
        let manifest = store.read_or_create("brand-new").await.unwrap();
        assert_eq!(manifest.rev, "0-0000000000000000");
        // nothing was persisted
        assert!(store.get_manifest("brand-new").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_name_rejected_before_backend() {
        let (_dir, store) = store().await;
        let err = store.get_manifest("../escape").await.unwrap_err();
        assert!(matches!(err, StoreError::BadRequest(_)));
    }
}
