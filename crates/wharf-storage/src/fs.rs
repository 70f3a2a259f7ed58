//! Default filesystem backend.
//!
//! Layout, per package (scoped names nest one directory deeper):
//!
//! ```text
//! <storage>/
//!   .wharf-db.json              global package index + tokens
//!   foo/
//!     package.json              manifest document
//!     foo-1.0.0.tgz             tarball blobs
//!   @scope/
//!     bar/
//!       package.json
//! ```
//!
//! Manifests and tarballs are published with a write-temp-then-rename, so a
//! concurrent reader observes either the old bytes or the full new bytes.
//! Per-package mutation order is enforced with a keyed async mutex; readers
//! are not serialized.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use wharf_model::{Manifest, SearchItem};
use wharf_utils::{unique_suffix, CancelToken};

use crate::error::{ErrorContext, Result, StorageError};
use crate::index::{IndexFile, INDEX_FILENAME};
use crate::{StorageBackend, TarballSink, TarballStream, Token, Transform};

const MANIFEST_FILENAME: &str = "package.json";
const READ_CHUNK: usize = 64 * 1024;

pub struct FsBackend {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    index_lock: tokio::sync::Mutex<()>,
}

impl FsBackend {
    /// Opens (and creates if needed) a storage root.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("creating storage root {}", root.display()))?;
        Ok(FsBackend {
            root,
            locks: Mutex::new(HashMap::new()),
            index_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn package_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn manifest_path(&self, name: &str) -> PathBuf {
        self.package_dir(name).join(MANIFEST_FILENAME)
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILENAME)
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Writes the manifest without taking the package lock; callers that
    /// need serialization hold it already.
    async fn write_manifest_unlocked(&self, name: &str, manifest: &Manifest) -> Result<()> {
        let dir = self.package_dir(name);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating package directory {}", dir.display()))?;

        let target = self.manifest_path(name);
        let tmp = dir.join(format!(".{}.tmp-{}", MANIFEST_FILENAME, unique_suffix()));
        let bytes = serde_json::to_vec(manifest)?;

        let outcome = async {
            let mut file = fs::File::create(&tmp)
                .await
                .with_context(|| format!("creating manifest temp {}", tmp.display()))?;
            file.write_all(&bytes)
                .await
                .with_context(|| format!("writing manifest temp {}", tmp.display()))?;
            file.sync_all()
                .await
                .with_context(|| format!("syncing manifest temp {}", tmp.display()))?;
            drop(file);
            fs::rename(&tmp, &target)
                .await
                .with_context(|| format!("publishing manifest {}", target.display()))
        }
        .await;

        if outcome.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        outcome
    }
}

fn check_filename(filename: &str) -> Result<()> {
    let plain = !filename.is_empty()
        && filename != "."
        && filename != ".."
        && filename != MANIFEST_FILENAME
        && !filename.contains('/')
        && !filename.contains('\\');
    if plain {
        Ok(())
    } else {
        Err(StorageError::InvalidFilename(filename.to_string()))
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    async fn read_manifest(&self, name: &str) -> Result<Manifest> {
        let path = self.manifest_path(name);
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("reading manifest {}", path.display()))?;
        Ok(Manifest::from_json_slice(&bytes)?)
    }

    async fn write_manifest(&self, name: &str, manifest: &Manifest) -> Result<()> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        self.write_manifest_unlocked(name, manifest).await
    }

    async fn create_manifest(&self, name: &str, manifest: &Manifest) -> Result<()> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let exists = fs::try_exists(self.manifest_path(name))
            .await
            .with_context(|| format!("probing package {name}"))?;
        if exists {
            return Err(StorageError::Conflict);
        }
        self.write_manifest_unlocked(name, manifest).await
    }

    async fn update_manifest(&self, name: &str, mut transform: Transform<'_>) -> Result<Manifest> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        // The lock serializes every mutator in this process, so the
        // transform runs exactly once per call.
        let current = self.read_manifest(name).await?;
        let next = transform(current)?;
        self.write_manifest_unlocked(name, &next).await?;
        Ok(next)
    }

    async fn add_package(&self, name: &str) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut index = IndexFile::load(&self.index_path()).await?;
        if index.insert(name) {
            index.save(&self.index_path()).await?;
            debug!(package = name, "registered package in index");
        }
        Ok(())
    }

    async fn remove_package(&self, name: &str) -> Result<()> {
        {
            let _guard = self.index_lock.lock().await;
            let mut index = IndexFile::load(&self.index_path()).await?;
            if index.remove(name) {
                index.save(&self.index_path()).await?;
            }
        }

        let dir = self.package_dir(name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("removing package directory {}", dir.display()))
            }
        }
    }

    async fn list_packages(&self) -> Result<Vec<String>> {
        let index = IndexFile::load(&self.index_path()).await?;
        Ok(index.list)
    }

    async fn open_tarball_read(&self, name: &str, filename: &str) -> Result<TarballStream> {
        check_filename(filename)?;
        let path = self.package_dir(name).join(filename);
        let file = fs::File::open(&path)
            .await
            .with_context(|| format!("opening tarball {}", path.display()))?;

        let stream = futures::stream::try_unfold(file, |mut file| async move {
            let mut buf = vec![0u8; READ_CHUNK];
            let n = file
                .read(&mut buf)
                .await
                .with_context(|| "reading tarball".to_string())?;
            if n == 0 {
                Ok(None)
            } else {
                buf.truncate(n);
                Ok(Some((Bytes::from(buf), file)))
            }
        });
        Ok(Box::pin(stream))
    }

    async fn open_tarball_write(
        &self,
        name: &str,
        filename: &str,
        signal: CancelToken,
    ) -> Result<Box<dyn TarballSink>> {
        check_filename(filename)?;
        let dir = self.package_dir(name);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating package directory {}", dir.display()))?;

        let target = dir.join(filename);
        let tmp = dir.join(format!(".{}.tmp-{}", filename, unique_suffix()));
        let file = fs::File::create(&tmp)
            .await
            .with_context(|| format!("creating tarball temp {}", tmp.display()))?;

        Ok(Box::new(FsTarballSink {
            file: Some(file),
            tmp,
            target,
            signal,
        }))
    }

    async fn delete_tarball(&self, name: &str, filename: &str) -> Result<()> {
        check_filename(filename)?;
        let path = self.package_dir(name).join(filename);
        fs::remove_file(&path)
            .await
            .with_context(|| format!("deleting tarball {}", path.display()))
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchItem>> {
        let needle = query.to_lowercase();
        let index = IndexFile::load(&self.index_path()).await?;
        Ok(index
            .list
            .into_iter()
            .filter(|name| name.to_lowercase().contains(&needle))
            .map(|name| SearchItem { name, score: None })
            .collect())
    }

    async fn save_token(&self, token: Token) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut index = IndexFile::load(&self.index_path()).await?;
        let tokens = index.tokens.entry(token.user.clone()).or_default();
        tokens.retain(|existing| existing.key != token.key);
        tokens.push(token);
        index.save(&self.index_path()).await
    }

    async fn delete_token(&self, user: &str, key: &str) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut index = IndexFile::load(&self.index_path()).await?;
        let Some(tokens) = index.tokens.get_mut(user) else {
            return Err(StorageError::NotFound);
        };
        let before = tokens.len();
        tokens.retain(|token| token.key != key);
        if tokens.len() == before {
            return Err(StorageError::NotFound);
        }
        if tokens.is_empty() {
            index.tokens.remove(user);
        }
        index.save(&self.index_path()).await
    }

    async fn read_tokens(&self, user: &str) -> Result<Vec<Token>> {
        let index = IndexFile::load(&self.index_path()).await?;
        Ok(index.tokens.get(user).cloned().unwrap_or_default())
    }
}

struct FsTarballSink {
    file: Option<fs::File>,
    tmp: PathBuf,
    target: PathBuf,
    signal: CancelToken,
}

impl FsTarballSink {
    async fn discard(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.tmp).await;
        }
    }
}

#[async_trait]
impl TarballSink for FsTarballSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        if self.signal.is_cancelled() {
            self.discard().await;
            return Err(StorageError::Cancelled);
        }
        let Some(file) = self.file.as_mut() else {
            return Err(StorageError::Cancelled);
        };
        file.write_all(&chunk)
            .await
            .with_context(|| format!("writing tarball temp {}", self.tmp.display()))
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.signal.is_cancelled() {
            self.discard().await;
            return Err(StorageError::Cancelled);
        }
        let Some(mut file) = self.file.take() else {
            return Err(StorageError::Cancelled);
        };

        let outcome = async {
            file.flush()
                .await
                .with_context(|| format!("flushing tarball temp {}", self.tmp.display()))?;
            file.sync_all()
                .await
                .with_context(|| format!("syncing tarball temp {}", self.tmp.display()))?;
            drop(file);
            fs::rename(&self.tmp, &self.target)
                .await
                .with_context(|| format!("publishing tarball {}", self.target.display()))
        }
        .await;

        if outcome.is_err() {
            let _ = fs::remove_file(&self.tmp).await;
        }
        outcome
    }

    async fn abort(mut self: Box<Self>) -> Result<()> {
        self.discard().await;
        Ok(())
    }
}

impl Drop for FsTarballSink {
    fn drop(&mut self) {
        // Abandoned sink: release the temp file so the prior blob, if any,
        // stays the visible one.
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}
